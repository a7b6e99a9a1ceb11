//! Delivery of rendered notifications.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Transport errors.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Transport not configured: {0}")]
    Unavailable(String),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Invalid link URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported link scheme: {0}")]
    UnsupportedScheme(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// A rendered message, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Display-formatted recipient, e.g. `Patient Ana Ruiz <ana@example.com>`
    pub recipient: String,
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Outcome of a notification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered { transport: String },
    Failed { reason: String },
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered { .. })
    }
}

/// Outbound notification sender consumed by the intake engine.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Delivery;
}

/// A concrete delivery mechanism (mail API, SMTP relay, ...).
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, notification: &Notification) -> NotifyResult<()>;
}

/// Tries each transport in order; the first one that accepts the message wins.
#[derive(Default)]
pub struct FallbackNotifier {
    transports: Vec<Box<dyn Transport>>,
    test_recipient: Option<String>,
}

impl FallbackNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transport to the end of the chain.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Redirect every message to a single inbox (non-production environments).
    pub fn with_test_recipient(mut self, inbox: Option<String>) -> Self {
        self.test_recipient = inbox
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }
}

impl Notifier for FallbackNotifier {
    fn notify(&self, notification: &Notification) -> Delivery {
        let message = match &self.test_recipient {
            Some(inbox) => redirect_to_test_inbox(notification, inbox),
            None => notification.clone(),
        };

        for transport in &self.transports {
            match transport.send(&message) {
                Ok(()) => {
                    debug!(transport = transport.name(), subject = %message.subject, "notification delivered");
                    return Delivery::Delivered {
                        transport: transport.name().to_string(),
                    };
                }
                Err(e) => {
                    warn!(transport = transport.name(), error = %e, "notification transport failed");
                }
            }
        }

        Delivery::Failed {
            reason: if self.transports.is_empty() {
                "no transport configured".into()
            } else {
                "all transports failed".into()
            },
        }
    }
}

/// Rewrite a message so it lands in `inbox` while still naming the real recipient.
pub fn redirect_to_test_inbox(notification: &Notification, inbox: &str) -> Notification {
    let original = notification.recipient.trim();
    let original = if original.is_empty() {
        "unknown"
    } else {
        original
    };

    let hint = format!("---\nOriginal recipient: {}", original);
    let body = if notification.body.is_empty() {
        hint
    } else {
        format!("{}\n\n{}", notification.body, hint)
    };

    Notification {
        recipient: inbox.to_string(),
        subject: format!("[FOR {}] {}", original, notification.subject),
        body,
    }
}

/// In-memory queue; the host drains it and performs the actual sending.
#[derive(Default)]
pub struct Outbox {
    queue: Mutex<Vec<Notification>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued notification, leaving the outbox empty.
    pub fn drain(&self) -> Vec<Notification> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *queue)
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for Outbox {
    fn notify(&self, notification: &Notification) -> Delivery {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        Delivery::Delivered {
            transport: "outbox".into(),
        }
    }
}

/// Role label shown in front of the recipient name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRole {
    Patient,
    Doctor,
    Admin,
}

impl RecipientRole {
    fn label(self) -> &'static str {
        match self {
            RecipientRole::Patient => "Patient",
            RecipientRole::Doctor => "Doctor",
            RecipientRole::Admin => "Admin",
        }
    }
}

/// Format `"<Role> <Name> <email>"`, or `None` when there is no address.
pub fn format_recipient(email: &str, full_name: Option<&str>, role: RecipientRole) -> Option<String> {
    let email = email.trim();
    if email.is_empty() {
        return None;
    }

    let display = match full_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} {}", role.label(), name),
        None => role.label().to_string(),
    };

    Some(format!("{} <{}>", display, email))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }

        fn send(&self, _notification: &Notification) -> NotifyResult<()> {
            Err(NotifyError::Unavailable("missing api key".into()))
        }
    }

    struct RecordingTransport {
        sent: Mutex<Vec<Notification>>,
    }

    impl Transport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        fn send(&self, notification: &Notification) -> NotifyResult<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn sample() -> Notification {
        Notification {
            recipient: "Patient Ana <ana@example.com>".into(),
            subject: "Request received".into(),
            body: "Hello Ana".into(),
        }
    }

    #[test]
    fn test_fallback_uses_next_transport() {
        let notifier = FallbackNotifier::new()
            .with_transport(Box::new(FailingTransport))
            .with_transport(Box::new(RecordingTransport {
                sent: Mutex::new(Vec::new()),
            }));

        let delivery = notifier.notify(&sample());
        assert_eq!(
            delivery,
            Delivery::Delivered {
                transport: "recording".into()
            }
        );
    }

    #[test]
    fn test_all_transports_failing() {
        let notifier = FallbackNotifier::new().with_transport(Box::new(FailingTransport));
        let delivery = notifier.notify(&sample());
        assert!(!delivery.is_delivered());

        let empty = FallbackNotifier::new();
        assert!(matches!(empty.notify(&sample()), Delivery::Failed { .. }));
    }

    #[test]
    fn test_redirect_to_test_inbox() {
        let redirected = redirect_to_test_inbox(&sample(), "qa@example.com");
        assert_eq!(redirected.recipient, "qa@example.com");
        assert_eq!(
            redirected.subject,
            "[FOR Patient Ana <ana@example.com>] Request received"
        );
        assert!(redirected.body.starts_with("Hello Ana\n\n---"));
        assert!(redirected
            .body
            .ends_with("Original recipient: Patient Ana <ana@example.com>"));
    }

    #[test]
    fn test_blank_test_recipient_is_ignored() {
        let notifier = FallbackNotifier::new().with_test_recipient(Some("   ".into()));
        assert!(notifier.test_recipient.is_none());
    }

    #[test]
    fn test_outbox_drain() {
        let outbox = Outbox::new();
        assert!(outbox.is_empty());

        outbox.notify(&sample());
        outbox.notify(&sample());
        assert_eq!(outbox.len(), 2);

        let drained = outbox.drain();
        assert_eq!(drained.len(), 2);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_format_recipient() {
        assert_eq!(
            format_recipient("ana@example.com", Some(" Ana Ruiz "), RecipientRole::Patient),
            Some("Patient Ana Ruiz <ana@example.com>".into())
        );
        assert_eq!(
            format_recipient("doc@example.com", None, RecipientRole::Doctor),
            Some("Doctor <doc@example.com>".into())
        );
        assert_eq!(format_recipient("  ", Some("Ana"), RecipientRole::Patient), None);
    }
}
