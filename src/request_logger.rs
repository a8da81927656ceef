use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::{Duration, Instant};

/// Fairing to log one line per HTTP request with timing. Requests slower
/// than `slow_threshold` are logged at warn level.
pub struct RequestLogger {
    slow_threshold: Duration,
}

impl RequestLogger {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }
}

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let duration = request.local_cache(Instant::now).elapsed();
        let millis = duration.as_secs_f64() * 1000.0;

        if duration >= self.slow_threshold {
            log::warn!(
                "slow request: {} {} -> {} ({:.2}ms)",
                request.method(),
                request.uri(),
                response.status().code,
                millis
            );
        } else {
            log::info!(
                "{} {} -> {} ({:.2}ms)",
                request.method(),
                request.uri(),
                response.status().code,
                millis
            );
        }
    }
}
