use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use secrecy::Secret;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::TcpListener;
use tracing_actix_web::TracingLogger;

use crate::auth::{JwtSecret, TokenTtl};
use crate::config::{DatabaseSettings, Settings};
use crate::errors::ApiError;
use crate::routes::{
    admin_detailed_appointments, admin_filtered_doctors, admin_filtered_users, admin_statistics,
    all_appointments, appointment_detail, available_appointments, available_doctors,
    book_appointment, cancel_appointment, create_doctor, health_check, list_all_users,
    list_doctors, list_patients, login, me, my_appointments, publish_slots, register,
    search_doctors, update_status,
};

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(address)?;
        let connection = get_connection_pool(&config.database);
        let port = listener.local_addr()?.port();
        let server = run(
            listener,
            connection,
            config.application.jwt_secret,
            config.application.token_ttl_hours,
        )
        .await?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn get_connection_pool(config: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.with_db())
}

pub async fn run(
    listener: TcpListener,
    db_pool: PgPool,
    jwt_secret: Secret<String>,
    token_ttl_hours: i64,
) -> Result<Server, anyhow::Error> {
    let connection: web::Data<PgPool> = web::Data::new(db_pool);
    let jwt_secret = web::Data::new(JwtSecret(jwt_secret));
    let token_ttl = web::Data::new(TokenTtl(token_ttl_hours));
    let server: Server = HttpServer::new(move || {
        // Malformed payloads fail inside the extractors, before any handler
        // runs; route them through ApiError so the `{message}` body contract
        // holds for 400s too.
        let json_config = web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::Validation(err.to_string()).into());
        let query_config = web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::Validation(err.to_string()).into());
        let path_config = web::PathConfig::default()
            .error_handler(|err, _req| ApiError::Validation(err.to_string()).into());
        App::new()
            .wrap(TracingLogger::default())
            .app_data(json_config)
            .app_data(query_config)
            .app_data(path_config)
            .service(
                web::scope("/api/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/me", web::get().to(me))
                    .route("/users", web::get().to(list_all_users)),
            )
            .service(
                web::scope("/api/appointments")
                    .route("/available-slots", web::post().to(publish_slots))
                    .route("/available-doctors", web::get().to(available_doctors))
                    .route("/book", web::post().to(book_appointment))
                    .route("/my-appointments", web::get().to(my_appointments))
                    .route("/all", web::get().to(all_appointments))
                    .route("/admin/detailed", web::get().to(admin_detailed_appointments))
                    .route("/admin/statistics", web::get().to(admin_statistics))
                    .route("/{id}/status", web::patch().to(update_status))
                    .route("/{id}/cancel", web::patch().to(cancel_appointment))
                    .route("/{id}", web::get().to(appointment_detail)),
            )
            .service(
                web::scope("/api")
                    .route("/doctors", web::post().to(create_doctor))
                    .route("/doctors", web::get().to(list_doctors))
                    .route("/doctors/search", web::get().to(search_doctors))
                    .route("/users", web::get().to(list_patients))
                    .route("/admin/users", web::get().to(admin_filtered_users))
                    .route("/admin/doctors", web::get().to(admin_filtered_doctors))
                    .route(
                        "/available-appointments",
                        web::get().to(available_appointments),
                    ),
            )
            .route("/health_check", web::get().to(health_check))
            .app_data(connection.clone())
            .app_data(jwt_secret.clone())
            .app_data(token_ttl.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}
