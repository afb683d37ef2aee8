use std::time::Duration;

use axum::response::sse::Event;
use chrono::{SecondsFormat, Utc};
use tokio::sync::mpsc;

/// Interval between heartbeat comments on every live stream.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// One frame pushed to a subscriber's event stream.
#[derive(Debug, Clone)]
pub enum StreamPayload {
    /// An `event:`/`data:` framed application event.
    Event { name: &'static str, data: String },
    /// A comment line; carries no state.
    Comment(String),
    /// Terminate the stream server-side (room destroyed or player left).
    Close,
}

impl StreamPayload {
    /// Wire form of the frame. `Close` has none; it ends the stream.
    pub fn into_event(self) -> Option<Event> {
        match self {
            StreamPayload::Event { name, data } => Some(Event::default().event(name).data(data)),
            StreamPayload::Comment(text) => Some(Event::default().comment(text)),
            StreamPayload::Close => None,
        }
    }
}

/// Handle to push frames to one connected subscriber.
#[derive(Debug, Clone)]
pub struct Sink {
    pub id: u64,
    pub user_id: i64,
    pub tx: mpsc::UnboundedSender<StreamPayload>,
}

impl Sink {
    /// Best-effort send of one application event.
    pub fn send_event(&self, name: &'static str, data: &str) {
        let payload = StreamPayload::Event {
            name,
            data: data.to_string(),
        };
        if self.tx.send(payload).is_err() {
            tracing::debug!(sink = self.id, "dropping event for closed stream");
        }
    }

    /// Ask the transport side to end this stream.
    pub fn close(&self) {
        let _ = self.tx.send(StreamPayload::Close);
    }
}

/// Serialize-once fan-out: write `data` to every sink. Sinks whose transport
/// has gone away are skipped; their removal happens on the unsubscribe path
/// when the connection task winds down.
pub fn broadcast(sinks: &[Sink], name: &'static str, data: &str) {
    for sink in sinks {
        sink.send_event(name, data);
    }
}

/// Spawn the heartbeat for one stream. Ticks every 25 s until the stream's
/// receiver is gone.
pub fn spawn_heartbeat(tx: mpsc::UnboundedSender<StreamPayload>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.tick().await; // the first tick fires immediately
        loop {
            interval.tick().await;
            let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let comment = format!("heartbeat {stamp}");
            if tx.send(StreamPayload::Comment(comment)).is_err() {
                break;
            }
        }
    });
}
