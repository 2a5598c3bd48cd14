mod clients;
mod database;
mod error;
mod handlers;
mod models;
mod rate_limit;
mod reviews;
mod search;
mod subscription;

use actix_cors::Cors;
use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpServer};
use std::env;
use std::sync::Arc;

use crate::clients::auth::AuthClient;
use crate::clients::storage::StorageClient;
use crate::database::Database;
use crate::rate_limit::store::{KvStore, MemoryKvStore, RedisRestStore};
use crate::rate_limit::RateLimiter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = env::var("PORT").unwrap_or_else(|_| "8082".to_string());
    let bind_address = format!("{}:{}", host, port);

    let identity_service_url =
        env::var("IDENTITY_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8083".to_string());
    let storage_service_url =
        env::var("STORAGE_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8084".to_string());
    let storage_token = env::var("STORAGE_SERVICE_TOKEN").unwrap_or_default();

    let database_url = env::var("DATABASE_URL").map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "DATABASE_URL must be set in environment",
        )
    })?;

    let db = Database::connect(&database_url).await.map_err(|err| {
        log::error!("Failed to initialize database: {err:?}");
        std::io::Error::new(std::io::ErrorKind::Other, err)
    })?;

    // Request counters live in Redis when configured, otherwise in process
    // memory. An in-memory limiter resets on restart.
    let kv_store: Arc<dyn KvStore> = match (
        env::var("KV_REST_URL").ok(),
        env::var("KV_REST_TOKEN").ok(),
    ) {
        (Some(url), Some(token)) => Arc::new(RedisRestStore::new(url, token)),
        _ => {
            log::warn!("KV_REST_URL not set, rate limiting uses in-process memory");
            Arc::new(MemoryKvStore::new())
        }
    };

    let db_data = web::Data::new(db);
    let limiter = web::Data::new(RateLimiter::new(kv_store));
    let auth_client = web::Data::new(AuthClient::new(identity_service_url));
    let storage_client = web::Data::new(StorageClient::new(storage_service_url, storage_token));

    log::info!("🚀 Starting Directorio Local Service on {}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(db_data.clone())
            .app_data(limiter.clone())
            .app_data(auth_client.clone())
            .app_data(storage_client.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(from_fn(rate_limit::enforce))
            // Health
            .service(handlers::health_check)
            // Auth proxy and profiles
            .service(handlers::sign_in)
            .service(handlers::sign_up)
            .service(handlers::sign_in_with_provider)
            .service(handlers::sign_out)
            .service(handlers::send_verification_email)
            .service(handlers::get_profile)
            // Business listings
            .service(handlers::create_business)
            .service(handlers::list_my_businesses)
            .service(handlers::get_business)
            .service(handlers::update_business)
            .service(handlers::delete_business)
            // Listing images
            .service(handlers::upload_image)
            .service(handlers::delete_image)
            // Search
            .service(handlers::search_businesses)
            // Reviews
            .service(handlers::submit_review)
            .service(handlers::respond_to_review)
            .service(handlers::flag_review)
            .service(handlers::delete_review)
    })
    .bind(&bind_address)?
    .run()
    .await
}
