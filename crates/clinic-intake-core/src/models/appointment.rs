//! Appointment models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::RequestStatus;

pub const DEFAULT_DURATION_MINUTES: u32 = 30;

/// Appointment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }

    /// Request status synthesized for an appointment that has no request.
    pub fn backfill_request_status(&self) -> RequestStatus {
        match self {
            AppointmentStatus::Cancelled => RequestStatus::Rejected,
            AppointmentStatus::Pending => RequestStatus::Pending,
            AppointmentStatus::Confirmed | AppointmentStatus::Completed => RequestStatus::Confirmed,
        }
    }
}

/// Where an appointment was booked from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentChannel {
    /// Public intake form
    Public,
    /// Patient portal
    Portal,
    /// Staff fast path
    Admin,
}

impl AppointmentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentChannel::Public => "public",
            AppointmentChannel::Portal => "portal",
            AppointmentChannel::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(AppointmentChannel::Public),
            "portal" => Some(AppointmentChannel::Portal),
            "admin" => Some(AppointmentChannel::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentPriority {
    Routine,
    Priority,
    Emergency,
}

impl AppointmentPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentPriority::Routine => "routine",
            AppointmentPriority::Priority => "priority",
            AppointmentPriority::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "routine" => Some(AppointmentPriority::Routine),
            "priority" => Some(AppointmentPriority::Priority),
            "emergency" => Some(AppointmentPriority::Emergency),
            _ => None,
        }
    }
}

/// A scheduled clinical appointment.
///
/// The link to an originating request lives on the request side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: i64,
    pub public_id: String,
    pub patient_id: Option<i64>,
    pub doctor_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub duration_minutes: u32,
    pub reason: Option<String>,
    pub additional_notes: Option<String>,
    pub channel: AppointmentChannel,
    pub priority: AppointmentPriority,
    pub status: AppointmentStatus,
    pub created_by_user: Option<String>,
    /// JSON object, e.g. `{"requestPublicId": "..."}`
    pub intake_payload: serde_json::Value,
    /// Name snapshot kept for display when the patient record changes
    pub legacy_name: Option<String>,
    pub legacy_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a new appointment row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub patient_id: Option<i64>,
    pub doctor_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub duration_minutes: u32,
    pub reason: Option<String>,
    pub additional_notes: Option<String>,
    pub channel: AppointmentChannel,
    pub priority: AppointmentPriority,
    pub status: AppointmentStatus,
    pub created_by_user: Option<String>,
    pub intake_payload: serde_json::Value,
    pub legacy_name: Option<String>,
    pub legacy_phone: Option<String>,
}

impl NewAppointment {
    /// A confirmed, routine, public-channel appointment with default duration.
    pub fn new(doctor_id: String, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            patient_id: None,
            doctor_id,
            scheduled_for,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            reason: None,
            additional_notes: None,
            channel: AppointmentChannel::Public,
            priority: AppointmentPriority::Routine,
            status: AppointmentStatus::Confirmed,
            created_by_user: None,
            intake_payload: serde_json::json!({}),
            legacy_name: None,
            legacy_phone: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_status_mapping() {
        assert_eq!(
            AppointmentStatus::Cancelled.backfill_request_status(),
            RequestStatus::Rejected
        );
        assert_eq!(
            AppointmentStatus::Pending.backfill_request_status(),
            RequestStatus::Pending
        );
        assert_eq!(
            AppointmentStatus::Confirmed.backfill_request_status(),
            RequestStatus::Confirmed
        );
        assert_eq!(
            AppointmentStatus::Completed.backfill_request_status(),
            RequestStatus::Confirmed
        );
    }

    #[test]
    fn test_new_appointment_defaults() {
        let appt = NewAppointment::new("doc-1".into(), Utc::now());
        assert_eq!(appt.duration_minutes, 30);
        assert_eq!(appt.channel, AppointmentChannel::Public);
        assert_eq!(appt.priority, AppointmentPriority::Routine);
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
        assert_eq!(appt.intake_payload, serde_json::json!({}));
    }
}
