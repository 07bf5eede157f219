/// Transport-side delivery of hub events
///
/// The hub never touches sockets directly. Each connection is registered
/// with a [`RoomSender`] that pushes events into whatever mailbox the
/// transport drains (an actix actor, an mpsc channel, ...).
use tokio::sync::mpsc::UnboundedSender;

use super::events::HubEvent;

/// Per-recipient delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Receiving side is gone; the connection should be dropped
    #[error("recipient closed")]
    Closed,

    /// Mailbox is full; the event is dropped for this recipient only
    #[error("recipient mailbox full")]
    Backpressure,
}

impl DeliveryError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::Closed => "closed",
            DeliveryError::Backpressure => "backpressure",
        }
    }
}

/// Fire-and-forget sender for one live connection.
///
/// Must not block: the hub calls it while holding its membership lock.
pub trait RoomSender: Send + Sync {
    fn deliver(&self, event: &HubEvent) -> Result<(), DeliveryError>;
}

impl RoomSender for UnboundedSender<HubEvent> {
    fn deliver(&self, event: &HubEvent) -> Result<(), DeliveryError> {
        self.send(event.clone()).map_err(|_| DeliveryError::Closed)
    }
}
