use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::hub::RoomId;
use crate::state::AppState;

/// GET /api/v1/rooms/{room_id}
#[get("/api/v1/rooms/{room_id}")]
pub async fn get_room(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let room_id = RoomId::parse(path.into_inner())?;

    match state.hub.room_snapshot(room_id.as_str()) {
        Some(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        // Rooms only exist while they have members
        None => Ok(HttpResponse::Ok().json(json!({
            "room_id": room_id,
            "member_count": 0,
            "connections": [],
        }))),
    }
}

/// GET /api/v1/hub/stats
#[get("/api/v1/hub/stats")]
pub async fn hub_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.hub.stats())
}
