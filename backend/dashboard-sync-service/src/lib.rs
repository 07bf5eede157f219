pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use hub::{ConnectionId, HubEvent, RoomHub, RoomId, UpdateEvent};
pub use state::AppState;
