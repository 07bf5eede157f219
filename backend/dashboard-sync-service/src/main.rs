use dashboard_sync_service::{config::Config, error::AppError, logging, server, state::AppState};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    let cfg = Arc::new(Config::from_env()?);
    logging::init_tracing(cfg.log_format);

    let state = AppState::new(cfg.clone());
    let (http_server, addrs) = server::build(state)?;

    tracing::info!(?addrs, "starting dashboard-sync-service");

    http_server
        .await
        .map_err(|e| AppError::StartServer(format!("HTTP server: {e}")))
}
