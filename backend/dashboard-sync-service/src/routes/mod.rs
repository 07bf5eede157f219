use actix_web::web;

use crate::config::Config;
use crate::error::AppError;
use crate::metrics;

pub mod rooms;
pub mod updates;
pub mod ws;

pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into())
}

/// Register every route of the service
pub fn register_routes(cfg: &mut web::ServiceConfig, config: &Config) {
    cfg.app_data(json_config(config.max_update_bytes))
        .service(ws::ws_handler)
        .service(updates::post_update)
        .service(updates::post_room_update)
        .service(rooms::get_room)
        .service(rooms::hub_stats)
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}
