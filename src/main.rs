use std::io;
use std::sync::Arc;

use actix_web::{middleware::Logger, App, HttpServer};
use dotenv::dotenv;

use task_manager::config::Config;
use task_manager::store::{MemoryStore, PgStore, Store};
use task_manager::{configure, cors, AppState};

fn startup_error(context: &str, error: impl std::fmt::Display) -> io::Error {
    log::error!("{}: {}", context, error);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, error))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.db_max_connections, config.store_timeout)
                .await
                .map_err(|e| startup_error("Failed to connect to database", e))?;
            store
                .migrate()
                .await
                .map_err(|e| startup_error("Failed to run migrations", e))?;
            log::info!("Using PostgreSQL store");
            Arc::new(store)
        }
        None => {
            log::warn!("DATABASE_URL not set; using the in-memory store, data will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::build(&config, store);

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        match state.users.seed_admin(email, password).await {
            Ok(Some(admin)) => log::info!("Seeded administrator {} ({})", admin.id, admin.email),
            Ok(None) => log::info!("Administrator {} already exists", email),
            Err(e) => return Err(startup_error("Failed to seed administrator", e)),
        }
    }

    log::info!("Starting server at {}", config.server_url());
    let bind = (config.server_host.clone(), config.server_port);
    let cors_origins = config.cors_origins.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&cors_origins))
            .wrap(Logger::default())
            .configure(configure(state.clone()))
    })
    .bind(bind)?
    .run()
    .await
}
