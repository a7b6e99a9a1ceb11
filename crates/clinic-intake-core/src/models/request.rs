//! Appointment-request models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::patient::Gender;

/// Request workflow status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Initial state after intake
    Pending,
    /// Converted into an appointment
    Confirmed,
    /// Declined by staff (admin note required)
    Rejected,
    /// Staff asked for another date (admin note required)
    Reschedule,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Confirmed => "confirmed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Reschedule => "reschedule",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "confirmed" => Some(RequestStatus::Confirmed),
            "rejected" => Some(RequestStatus::Rejected),
            "reschedule" => Some(RequestStatus::Reschedule),
            _ => None,
        }
    }

    /// Statuses that need an administrative note when set by staff.
    pub fn requires_admin_note(&self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Reschedule)
    }
}

/// An intake submission and its workflow state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentRequest {
    pub id: i64,
    pub public_id: String,

    // Contact snapshot at submission time
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
    pub symptoms: Option<String>,
    pub preferred_date: Option<DateTime<Utc>>,
    pub preferred_time_range: Option<String>,
    pub is_existing_patient: bool,

    // Workflow
    pub status: RequestStatus,
    pub admin_note: Option<String>,
    pub link_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub patient_id: Option<i64>,
    pub appointment_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentRequest {
    /// A token with no expiry, or one that elapsed before `now`, is expired.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.token_expires_at {
            Some(expires_at) => expires_at < now,
            None => true,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == RequestStatus::Confirmed
    }
}

/// A validated intake payload, ready to persist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntakeSubmission {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
    pub symptoms: Option<String>,
    pub preferred_date: Option<DateTime<Utc>>,
    pub preferred_time_range: Option<String>,
    /// The submitter claims to already be a patient; a link token is issued
    pub is_existing_patient: bool,
}

/// Staff listing filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    /// Case-insensitive substring over name, email, phone and document id
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Whose request history to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    Patient(i64),
    User(String),
    Email(String),
}

/// Best-known contact values from the latest request for an email.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalContact {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request_with_expiry(expires_at: Option<DateTime<Utc>>) -> AppointmentRequest {
        let now = Utc::now();
        AppointmentRequest {
            id: 1,
            public_id: uuid::Uuid::new_v4().to_string(),
            full_name: "Ana Ruiz".into(),
            email: "ana@example.com".into(),
            phone: None,
            document_id: None,
            birth_date: None,
            gender: None,
            age: None,
            symptoms: None,
            preferred_date: None,
            preferred_time_range: None,
            is_existing_patient: true,
            status: RequestStatus::Pending,
            admin_note: None,
            link_token: expires_at.map(|_| "tok".to_string()),
            token_expires_at: expires_at,
            user_id: None,
            patient_id: None,
            appointment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_strings() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Confirmed,
            RequestStatus::Rejected,
            RequestStatus::Reschedule,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_requires_admin_note() {
        assert!(RequestStatus::Rejected.requires_admin_note());
        assert!(RequestStatus::Reschedule.requires_admin_note());
        assert!(!RequestStatus::Pending.requires_admin_note());
        assert!(!RequestStatus::Confirmed.requires_admin_note());
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        assert!(request_with_expiry(Some(now - Duration::seconds(1))).is_token_expired(now));
        assert!(!request_with_expiry(Some(now + Duration::seconds(1))).is_token_expired(now));
        assert!(request_with_expiry(None).is_token_expired(now));
    }
}
