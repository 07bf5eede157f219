use crate::{config::Config, hub::RoomHub};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: RoomHub,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            hub: RoomHub::new(),
            config,
        }
    }
}
