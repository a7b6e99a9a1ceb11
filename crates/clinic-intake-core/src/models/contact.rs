//! Loosely-typed contact data from untrusted origins.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::patient::Gender;
use super::request::AppointmentRequest;

/// A birth date as it arrived from an origin, before lenient parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DateInput {
    /// Already a calendar date
    Date(NaiveDate),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    /// Any date-like text (`2001-04-12`, RFC 3339, `2001/04/12`, ...)
    Text(String),
}

impl From<NaiveDate> for DateInput {
    fn from(date: NaiveDate) -> Self {
        DateInput::Date(date)
    }
}

impl From<&str> for DateInput {
    fn from(text: &str) -> Self {
        DateInput::Text(text.to_string())
    }
}

/// Candidate patient attributes from one origin (intake, registration, staff).
///
/// Every field may be missing, blank or invalid; the identity resolver
/// treats all of those as "absent".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactCandidate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<DateInput>,
    pub gender: Option<String>,
    pub age: Option<i64>,
}

impl ContactCandidate {
    pub fn with_email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    /// The contact snapshot stored on a request.
    pub fn from_request(request: &AppointmentRequest) -> Self {
        Self {
            full_name: Some(request.full_name.clone()),
            phone: request.phone.clone(),
            email: Some(request.email.clone()),
            document_id: request.document_id.clone(),
            birth_date: request.birth_date.map(DateInput::Date),
            gender: request.gender.map(|g: Gender| g.as_str().to_string()),
            age: request.age.map(i64::from),
        }
    }
}
