//! Message templates for the intake workflow.
//!
//! Bodies are plain text; hosts that want HTML can wrap them.

use crate::dispatch::Notification;
use crate::links::IntakeLinks;

/// Closing line appended to every message.
pub const SIGNATURE: &str = "The clinic team.";

pub const REQUEST_RECEIVED_SUBJECT: &str = "Appointment request received";
pub const REQUEST_CONFIRMED_SUBJECT: &str = "Your appointment has been confirmed";
pub const REQUEST_STATUS_SUBJECT: &str = "Update on your appointment request";

/// Sent right after an intake submission is stored.
pub fn request_received(recipient: String, full_name: &str, links: &IntakeLinks) -> Notification {
    let account_line = match &links.link_appointment {
        Some(url) => format!(
            "If you already have an account, confirm and link your appointment here: {}",
            url
        ),
        None => format!("If you already have an account, log in here: {}", links.login),
    };

    let body = [
        format!("Hello {},", full_name),
        String::new(),
        "We have received your appointment request.".to_string(),
        format!("Create your account to follow your request here: {}", links.signup),
        account_line,
        String::new(),
        SIGNATURE.to_string(),
    ]
    .join("\n");

    Notification {
        recipient,
        subject: REQUEST_RECEIVED_SUBJECT.into(),
        body,
    }
}

/// Sent after a request has been converted into an appointment.
pub fn request_confirmed(
    recipient: String,
    full_name: &str,
    scheduled_for: &str,
    doctor: &str,
    login_url: &str,
) -> Notification {
    let body = [
        format!("Hello {},", full_name),
        String::new(),
        "Your appointment was confirmed.".to_string(),
        format!("Date and time: {}", scheduled_for),
        format!("Assigned doctor: {}", doctor),
        String::new(),
        format!("You can review your appointment here: {}", login_url),
        String::new(),
        SIGNATURE.to_string(),
    ]
    .join("\n");

    Notification {
        recipient,
        subject: REQUEST_CONFIRMED_SUBJECT.into(),
        body,
    }
}

/// Sent when staff reject a request or ask for a new date.
pub fn request_status_changed(
    recipient: String,
    full_name: &str,
    status_label: &str,
    admin_note: Option<&str>,
    login_url: &str,
) -> Notification {
    let mut lines = vec![
        format!("Hello {},", full_name),
        String::new(),
        format!("Your appointment request is now: {}.", status_label),
    ];
    if let Some(note) = admin_note.map(str::trim).filter(|n| !n.is_empty()) {
        lines.push(format!("Note from the clinic: {}", note));
    }
    lines.push(String::new());
    lines.push(format!("Follow your request here: {}", login_url));
    lines.push(String::new());
    lines.push(SIGNATURE.to_string());

    Notification {
        recipient,
        subject: REQUEST_STATUS_SUBJECT.into(),
        body: lines.join("\n"),
    }
}
