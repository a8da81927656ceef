#[macro_use]
extern crate rocket;

pub mod aggregates;
pub mod archive;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod invalidation;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod services;
pub mod store;
pub mod tasks;
pub mod warmup;

use crate::config::{ArchiveConfig, QueueMode};
use crate::db::ArchiveDb;
use crate::request_logger::RequestLogger;
use crate::services::ArchiveServices;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;
use tokio_util::sync::CancellationToken;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    log::info!("starting archive api server");

    let config = ArchiveConfig::from_env();
    log::info!(
        "archive config: cache backend {:?}, queue mode {:?}",
        config.cache_backend,
        config.queue_mode
    );

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger::new(config.slow_request_threshold))
        .attach(ArchiveDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match ArchiveDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match db::run_migrations(&pool).await {
                            Ok(_) => {
                                log::info!("database migrations successful");
                                Ok(rocket)
                            }
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        // Wire stores, cache and job queue on top of the pool
        .attach(AdHoc::try_on_ignite(
            "Manage Archive Services",
            move |rocket| async move {
                match ArchiveDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        let services = ArchiveServices::postgres(pool, config);
                        Ok(rocket.manage(services))
                    }
                    None => Err(rocket),
                }
            },
        ))
        // Spawn the recompute dispatcher in background
        .attach(AdHoc::on_liftoff("Spawn Task Dispatcher", |rocket| {
            Box::pin(async move {
                let Some(services) = rocket.state::<ArchiveServices>() else {
                    log::error!("failed to spawn task dispatcher: archive services not found");
                    return;
                };
                if services.config.queue_mode == QueueMode::Sync {
                    log::info!("task queue in sync mode, dispatcher not started");
                    return;
                }

                let dispatcher = services.dispatcher();
                let shutdown = CancellationToken::new();
                let shutdown_signal = rocket.shutdown();
                let token = shutdown.clone();
                tokio::spawn(async move {
                    shutdown_signal.await;
                    token.cancel();
                });
                tokio::spawn(async move {
                    log::info!("starting task dispatcher");
                    dispatcher.run(shutdown).await
                });
            })
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health routes
                routes::health::health_check,
                // Mailing list routes
                routes::lists::list_mailing_lists,
                routes::lists::get_list_overview,
                routes::lists::get_month_summary,
                // Thread routes
                routes::threads::get_thread,
                routes::threads::get_unread_status,
                routes::threads::record_view,
                // Vote routes
                routes::votes::cast_vote,
                routes::votes::retract_vote,
                // Admin routes
                routes::admin::warm_up_cache,
                routes::admin::rebuild_list,
                routes::admin::list_jobs,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Archive API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::config::ArchiveConfig;
    use crate::models::ArchivePolicy;
    use crate::services::ArchiveServices;
    use chrono::{DateTime, Utc};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};

    pub use database::{TestDatabase, TestDatabaseError};

    /// Convenience helpers for seeding archive tables directly, bypassing
    /// cache invalidation.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a mailing list with the given archive policy.
        pub async fn insert_mailing_list(
            &self,
            name: &str,
            policy: ArchivePolicy,
        ) -> Result<(), sqlx::Error> {
            sqlx::query(
                "INSERT INTO mailing_lists (name, list_id, archive_policy) VALUES ($1, $2, $3)",
            )
            .bind(name)
            .bind(name.replace('@', "."))
            .bind(policy)
            .execute(self.pool)
            .await?;

            Ok(())
        }

        /// Insert a user row, returning the new user id.
        pub async fn insert_user(&self, username: &str) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
                .bind(username)
                .fetch_one(self.pool)
                .await
        }

        /// Insert a thread row, returning its id.
        pub async fn insert_thread(
            &self,
            mailing_list: &str,
            thread_key: &str,
            date_active: DateTime<Utc>,
        ) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO threads (mailing_list, thread_id, date_active) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(mailing_list)
            .bind(thread_key)
            .bind(date_active)
            .fetch_one(self.pool)
            .await
        }

        /// Insert an email into an existing thread, returning its id.
        pub async fn insert_email(
            &self,
            mailing_list: &str,
            thread_id: i32,
            message_id: &str,
            sender_address: &str,
            subject: &str,
            date: DateTime<Utc>,
        ) -> Result<i32, sqlx::Error> {
            let email_id: i32 = sqlx::query_scalar(
                r#"INSERT INTO emails (mailing_list, thread_id, message_id, sender_address, subject, date)
                   VALUES ($1, $2, $3, $4, $5, $6)
                   RETURNING id"#,
            )
            .bind(mailing_list)
            .bind(thread_id)
            .bind(message_id)
            .bind(sender_address)
            .bind(subject)
            .bind(date)
            .fetch_one(self.pool)
            .await?;

            sqlx::query(
                "UPDATE threads SET starting_email_id = COALESCE(starting_email_id, $2) WHERE id = $1",
            )
            .bind(thread_id)
            .bind(email_id)
            .execute(self.pool)
            .await?;

            Ok(email_id)
        }

        /// Record a vote without touching the cache.
        pub async fn insert_vote(&self, email_id: i32, user_id: i32, value: i16) -> Result<(), sqlx::Error> {
            sqlx::query("INSERT INTO votes (email_id, user_id, value) VALUES ($1, $2, $3)")
                .bind(email_id)
                .bind(user_id)
                .bind(value)
                .execute(self.pool)
                .await?;

            Ok(())
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Provision a fresh, migrated database in a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stdout(
                        "database system is ready to accept connections",
                    ))
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ));

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions =
                    admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("archive_{}", Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                crate::db::run_migrations(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container: Some(container),
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled connection handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        services: ArchiveServices,
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging
        /// disabled, in-process services with tasks run inline.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                services: ArchiveServices::in_memory(ArchiveConfig::inline()),
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Replace the managed services, e.g. with Postgres-backed ones.
        pub fn manage_services(mut self, services: ArchiveServices) -> Self {
            self.services = services;
            self
        }

        /// Services on the given pool with the given config.
        pub fn manage_pg_pool(self, pool: PgPool, config: ArchiveConfig) -> Self {
            self.manage_services(ArchiveServices::postgres(pool, config))
        }

        /// The services the built Rocket instance will manage.
        pub fn services(&self) -> &ArchiveServices {
            &self.services
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment).manage(self.services);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
