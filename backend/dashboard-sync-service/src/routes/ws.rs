use crate::config::WebSocketConfig;
use crate::hub::{ClientEvent, ConnectionId, DeliveryError, HubEvent, RoomHub, RoomSender};
use crate::state::AppState;
use actix::prelude::SendError;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, Recipient, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};

// Hub event queued for one WebSocket actor
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Deliver(HubEvent);

/// Routes hub events into a session's actor mailbox
struct SessionSender(Recipient<Deliver>);

impl RoomSender for SessionSender {
    fn deliver(&self, event: &HubEvent) -> Result<(), DeliveryError> {
        self.0.try_send(Deliver(event.clone())).map_err(|e| match e {
            SendError::Full(_) => DeliveryError::Backpressure,
            SendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

// WebSocket Actor
struct WsSession {
    conn_id: Option<ConnectionId>,
    hub: RoomHub,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    mailbox_capacity: usize,
}

impl WsSession {
    fn new(hub: RoomHub, config: &WebSocketConfig) -> Self {
        Self {
            conn_id: None,
            hub,
            hb: Instant::now(),
            heartbeat_interval: config.heartbeat_interval,
            client_timeout: config.client_timeout,
            mailbox_capacity: config.mailbox_capacity,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.client_timeout {
                tracing::warn!(
                    connection_id = ?act.conn_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &HubEvent) {
        match event.to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => tracing::error!(event = event.name(), error = %e, "failed to serialize event"),
        }
    }

    fn handle_client_event(&mut self, evt: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(conn_id) = self.conn_id else {
            return;
        };

        // ROOM_JOINED / ROOM_LEFT arrive through the hub, via Deliver
        let result = match &evt {
            ClientEvent::JoinRoom(room_id) => self.hub.join(conn_id, room_id).map(|_| ()),
            ClientEvent::LeaveRoom(room_id) => self.hub.leave_room(conn_id, room_id).map(|_| ()),
        };

        if let Err(e) = result {
            tracing::warn!(connection_id = %conn_id, event = ?evt, error = %e, "rejected client event");
            Self::send_event(ctx, &HubEvent::error(e.code(), e.to_string()));
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(self.mailbox_capacity);

        let sender = SessionSender(ctx.address().recipient());
        let conn_id = self.hub.connect(sender);
        self.conn_id = Some(conn_id);

        tracing::info!(connection_id = %conn_id, "WebSocket session started");

        Self::send_event(ctx, &HubEvent::connected(conn_id.as_uuid()));
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(conn_id) = self.conn_id.take() {
            self.hub.leave(conn_id);
            tracing::info!(connection_id = %conn_id, "WebSocket session stopped");
        }
    }
}

impl Handler<Deliver> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        Self::send_event(ctx, &msg.0);
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match ClientEvent::from_json(&text) {
                    Ok(evt) => self.handle_client_event(evt, ctx),
                    Err(e) => {
                        tracing::warn!(connection_id = ?self.conn_id, error = %e, "failed to parse WS message");
                        Self::send_event(ctx, &HubEvent::error("INVALID_EVENT", e.to_string()));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
                Self::send_event(
                    ctx,
                    &HubEvent::error("UNSUPPORTED_FRAME", "binary frames are not supported"),
                );
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(connection_id = ?self.conn_id, ?reason, "WebSocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(connection_id = ?self.conn_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let config = &state.config.websocket;
    let session = WsSession::new(state.hub.clone(), config);

    ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(config.max_frame_bytes)
        .start()
}
