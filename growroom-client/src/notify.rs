use core::fmt;

use tokio::sync::broadcast;

const CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "success",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short-lived message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

/// Broadcasts notifications to every current subscriber.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(Level::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(Level::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(Level::Error, message.into());
    }

    fn notify(&self, level: Level, message: String) {
        tracing::debug!(level = %level, "{}", message);
        // No subscribers is fine.
        let _ = self.tx.send(Notification { level, message });
    }
}
