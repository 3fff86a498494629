mod api;
mod auth;
mod config;
mod media;
mod middleware;
mod models;
mod store;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::io;
use std::sync::Arc;

use api::AppState;
use auth::AuthService;
use config::Config;
use media::MediaStorage;
use middleware::EchoApiKey;
use store::Store;

/// Accounts created on first start so the API is usable without a signup flow
const DEMO_USERS: [(&str, &str); 2] = [("Ivan Volkov", "test"), ("Nikita Ivanov", "dev")];

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::load();

    // Initialize store
    let store = Arc::new(Store::new(&config.database_path).map_err(|e| {
        io::Error::new(io::ErrorKind::Other, format!("Failed to initialize database: {}", e))
    })?);

    let auth_service = Arc::new(AuthService::new(store.clone()));

    let media = Arc::new(MediaStorage::new(
        config.media_dir.clone(),
        config.allowed_extensions.clone(),
        config.max_upload_bytes,
    ));
    media
        .ensure_dir()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    if config.seed_demo_users {
        for (name, api_key) in DEMO_USERS {
            if let Err(e) = auth_service.ensure_user(name, api_key) {
                log::error!("Failed to seed demo user '{}': {}", name, e);
            }
        }
    }

    match store.count_users() {
        Ok(count) => log::info!("Database: {} ({} users)", config.database_path, count),
        Err(e) => log::warn!("Database: {} (could not count users: {})", config.database_path, e),
    }
    log::info!("Media directory: {}", media.root().display());

    let max_upload_bytes = config.max_upload_bytes;

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(vec![auth::API_KEY_HEADER])
            .max_age(3600);

        App::new()
            .wrap(EchoApiKey)
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(AppState {
                store: store.clone(),
                auth_service: auth_service.clone(),
                media: media.clone(),
            }))
            // Leave headroom for the multipart framing around the file
            .app_data(web::PayloadConfig::new(max_upload_bytes + 64 * 1024))
            .configure(api::configure_routes)
            .default_service(web::route().to(api::not_found))
    });

    log::info!("Starting microblog server on {}:{}", config.host, config.port);

    server.bind((config.host.as_str(), config.port))?.run().await
}
