//! Fire-and-forget sinks for lifecycle and failure events.

use tokio::sync::mpsc;

use crate::model::{LogEvent, Severity};

/// Receives coordinator events. Implementations must return promptly.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LogEvent) {
        match event.severity {
            Severity::Error => tracing::error!(target: "analysis_events", "{}", event.message),
            Severity::Warning => tracing::warn!(target: "analysis_events", "{}", event.message),
            Severity::Info => tracing::info!(target: "analysis_events", "{}", event.message),
            Severity::Log => tracing::debug!(target: "analysis_events", "{}", event.message),
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: LogEvent) {}
}

/// Pushes events onto an unbounded channel; a dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LogEvent) {
        let _ = self.tx.send(event);
    }
}
