/// Intake for committed mutations reported by the dashboard backend
///
/// The backend calls one of these once per logical mutation, after the
/// write is durable. The response is always 202 once the body parses: a
/// mutation must never fail because nobody is listening.
use actix_web::{post, web, HttpResponse};
use serde::Serialize;
use serde_json::Value;

use crate::hub::{NotifyOutcome, UpdateEvent, UpdateSource};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UpdateAccepted {
    pub room_id: String,
    pub source: UpdateSource,
    #[serde(flatten)]
    pub outcome: NotifyOutcome,
}

fn accept(state: &AppState, event: UpdateEvent) -> HttpResponse {
    let room_id = event.room_id.clone();
    let source = event.source;
    let outcome = state.hub.dispatch(event);

    tracing::info!(
        room_id = %room_id,
        source = source.as_str(),
        accepted = outcome.accepted,
        delivered = outcome.delivered,
        "update event processed"
    );

    HttpResponse::Accepted().json(UpdateAccepted {
        room_id,
        source,
        outcome,
    })
}

/// POST /internal/v1/updates
#[post("/internal/v1/updates")]
pub async fn post_update(
    state: web::Data<AppState>,
    body: web::Json<UpdateEvent>,
) -> HttpResponse {
    accept(&state, body.into_inner())
}

/// POST /internal/v1/rooms/{room_id}/{source}
///
/// Shorthand where the body is the updated document itself.
#[post("/internal/v1/rooms/{room_id}/{source}")]
pub async fn post_room_update(
    state: web::Data<AppState>,
    path: web::Path<(String, UpdateSource)>,
    body: web::Json<Value>,
) -> HttpResponse {
    let (room_id, source) = path.into_inner();
    accept(
        &state,
        UpdateEvent {
            room_id,
            source,
            payload: body.into_inner(),
        },
    )
}
