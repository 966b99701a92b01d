use std::env;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use tracing::info;
use uuid::Uuid;

use hospital_ehr::commands::{create_admin, ensure_admin};
use hospital_ehr::config::AppConfig;
use hospital_ehr::handlers;
use hospital_ehr::logging::init_logging;
use hospital_ehr::service::EhrService;

const USAGE: &str = "usage: hospital-ehr [create-admin <user-id> <full-name> <email>]";

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config.logging.level, config.logging.format)?;

    let store = hospital_ehr::build_store(&config.storage)?;

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => {}
        Some("create-admin") => {
            let [_, user_id, full_name, email] = args.as_slice() else {
                return Err(anyhow!(USAGE));
            };
            let user_id = Uuid::parse_str(user_id).with_context(|| format!("invalid user id '{}'", user_id))?;
            let admin = create_admin(store.as_ref(), user_id, full_name, email)?;
            println!("Created admin {} ({})", admin.full_name, admin.id);
            return Ok(());
        }
        Some(other) => return Err(anyhow!("unknown command '{}'\n{}", other, USAGE)),
    }

    if let Some(admin) = &config.bootstrap_admin {
        ensure_admin(store.as_ref(), admin.user_id, &admin.full_name, &admin.email)?;
    }

    let service = web::Data::new(EhrService::new(store));
    let auth = web::Data::new(config.auth.clone());

    info!(
        host = %config.server.host,
        port = config.server.port,
        backend = ?config.storage.backend,
        "starting hospital-ehr"
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(service.clone())
            .app_data(auth.clone())
            .app_data(handlers::json_config())
            .configure(handlers::configure)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind((config.server.host.as_str(), config.server.port))
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?
        .run()
        .await
        .context("Server error")
}
