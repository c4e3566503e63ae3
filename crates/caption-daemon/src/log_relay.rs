//! Forwards WARN and ERROR events to local clients as `BroadcastMessage::Log`.
use std::fmt::{self, Write};

use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::BroadcastMessage;

pub struct LogRelay {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl LogRelay {
    pub fn new(tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for LogRelay {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if !matches!(level, Level::WARN | Level::ERROR) || self.tx.receiver_count() == 0 {
            return;
        }

        let mut line = format!("{} {} ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageOnly(&mut line));
        let _ = self.tx.send(BroadcastMessage::Log(line));
    }
}

/// Clients show a single line of text, so structured fields are left out.
struct MessageOnly<'a>(&'a mut String);

impl Visit for MessageOnly<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{:?}", value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_relays_warnings_and_errors_only() {
        let (tx, mut rx) = broadcast::channel(8);
        let subscriber = tracing_subscriber::registry().with(LogRelay::new(tx));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("connected");
            tracing::warn!(attempt = 3, "link to {} dropped", "encoder.local");
            tracing::error!("encoder reported an error");
        });

        let mut lines = Vec::new();
        while let Ok(BroadcastMessage::Log(line)) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN link to encoder.local dropped"), "{}", lines[0]);
        assert!(!lines[0].contains("attempt"));
        assert!(lines[1].ends_with("ERROR encoder reported an error"), "{}", lines[1]);
    }
}
