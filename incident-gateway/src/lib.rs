pub mod api;
pub mod config;
pub mod errors;
pub mod forwarder;
pub mod gateway;
pub mod http;
pub mod identity;
pub mod incident;
pub mod metrics_defs;
pub mod user_lookup;

use crate::config::{Config, DEFAULT_JWT_SECRET};
use crate::errors::ServeError;
use crate::gateway::IncidentGateway;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

pub async fn run(config: Config) -> Result<(), ServeError> {
    config.validate()?;

    if config.jwt_secret == DEFAULT_JWT_SECRET {
        tracing::warn!("Using the default JWT secret, set JWT_SECRET_KEY for any real deployment");
    }

    let gateway = Arc::new(IncidentGateway::new(&config)?);
    tracing::info!(
        user_service = %config.user_service_url,
        main = %config.incident_service.main_url,
        redundant = %config.incident_service.redundant_url,
        "Configured upstream services"
    );
    let app = api::router(gateway);

    let ready = Arc::new(AtomicBool::new(false));
    let gateway_ready = ready.clone();
    let listener_config = config.listener.clone();

    let gateway_task = async move {
        let listener =
            TcpListener::bind((listener_config.host.as_str(), listener_config.port)).await?;
        gateway_ready.store(true, Ordering::Relaxed);
        tracing::info!(
            host = %listener_config.host,
            port = listener_config.port,
            "Incident gateway listening"
        );
        axum::serve(listener, app).await.map_err(ServeError::from)
    };

    match config.admin_listener {
        Some(admin) => {
            let admin_service = AdminService::new(move || ready.load(Ordering::Relaxed));
            let admin_task = run_http_service(&admin.host, admin.port, admin_service);
            tokio::try_join!(gateway_task, admin_task)?;
        }
        None => gateway_task.await?,
    }

    Ok(())
}
