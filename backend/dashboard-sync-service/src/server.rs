use std::net::SocketAddr;

use actix_cors::Cors;
use actix_web::{dev::Server, web, App, HttpServer};
use tracing_actix_web::TracingLogger;

use crate::error::AppError;
use crate::metrics::MetricsMiddleware;
use crate::routes;
use crate::state::AppState;

fn build_cors(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allow_any_method().allow_any_header().max_age(3600)
}

/// Bind the HTTP + WebSocket server. Returns the unstarted server future
/// and the addresses it is listening on.
pub fn build(state: AppState) -> Result<(Server, Vec<SocketAddr>), AppError> {
    let bind_addr = state.config.bind_addr();

    let http_server = HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&state.config.cors_allowed_origins))
            .wrap(MetricsMiddleware)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| routes::register_routes(cfg, &state.config))
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?;

    let addrs = http_server.addrs();
    Ok((http_server.run(), addrs))
}
