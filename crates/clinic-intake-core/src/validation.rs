//! Boundary validation for collaborator payloads.
//!
//! Raw payloads arrive loosely typed (every field optional, dates as text).
//! Each validator either returns the typed value the engine works with or a
//! list of field errors; nothing here touches the database.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use crate::identity::{is_plausible_email, ContactNormalizer, MAX_AGE};
use crate::lifecycle::LifecycleError;
use crate::models::{DateInput, Gender, IntakeSubmission, RequestFilter, RequestStatus};

pub const MIN_PHONE_LEN: usize = 6;
pub const MIN_DOCUMENT_LEN: usize = 5;
pub const MIN_SYMPTOMS_LEN: usize = 5;
pub const MIN_TOKEN_LEN: usize = 16;

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All rejected fields of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(|e| e.field).collect()
    }

    fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| format!("{}: {}", e.field, e.message)).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationErrors> for LifecycleError {
    fn from(errors: ValidationErrors) -> Self {
        LifecycleError::Validation(errors.to_string())
    }
}

/// Public intake form as submitted.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RawIntake {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub symptoms: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time_range: Option<String>,
    pub is_existing_patient: Option<bool>,
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Validate an intake submission against the reference day `today`.
pub fn validate_intake(raw: &RawIntake, today: NaiveDate) -> Result<IntakeSubmission, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let normalizer = ContactNormalizer::as_of(today);

    let full_name = trimmed(&raw.full_name);
    if full_name.is_none() {
        errors.push("fullName", "full name is required");
    }

    let email = trimmed(&raw.email);
    if !email.is_some_and(is_plausible_email) {
        errors.push("email", "a valid email is required");
    }

    let phone = trimmed(&raw.phone);
    if phone.map_or(true, |p| p.chars().count() < MIN_PHONE_LEN) {
        errors.push("phone", format!("phone must have at least {} characters", MIN_PHONE_LEN));
    }

    let document_id = trimmed(&raw.document_id);
    if document_id.map_or(true, |d| d.chars().count() < MIN_DOCUMENT_LEN) {
        errors.push(
            "documentId",
            format!("document id must have at least {} characters", MIN_DOCUMENT_LEN),
        );
    }

    let birth_date = match trimmed(&raw.birth_date) {
        None => {
            errors.push("birthDate", "birth date is required");
            None
        }
        Some(text) => {
            let parsed = normalizer.birth_date(Some(&DateInput::Text(text.to_string())));
            if parsed.is_none() {
                errors.push("birthDate", "birth date must be a valid date, not in the future");
            }
            parsed
        }
    };

    let gender = raw.gender.as_deref().and_then(Gender::parse);
    if gender.is_none() {
        errors.push("gender", "gender must be male or female");
    }

    let age = match raw.age {
        None => None,
        Some(age) => {
            let valid = normalizer.age(Some(age));
            if valid.is_none() {
                errors.push("age", format!("age must be between 0 and {}", MAX_AGE));
            }
            valid
        }
    };

    let symptoms = trimmed(&raw.symptoms);
    if symptoms.map_or(true, |s| s.chars().count() < MIN_SYMPTOMS_LEN) {
        errors.push(
            "symptoms",
            format!("symptoms must have at least {} characters", MIN_SYMPTOMS_LEN),
        );
    }

    let preferred_date = match trimmed(&raw.preferred_date) {
        None => None,
        Some(text) => {
            let parsed = parse_instant(text);
            if parsed.is_none() {
                errors.push("preferredDate", "preferred date must be a valid date");
            }
            parsed
        }
    };

    errors.into_result(IntakeSubmission {
        full_name: full_name.unwrap_or_default().to_string(),
        email: email.unwrap_or_default().to_string(),
        phone: phone.map(str::to_string),
        document_id: document_id.map(str::to_string),
        birth_date,
        gender,
        age,
        symptoms: symptoms.map(str::to_string),
        preferred_date,
        preferred_time_range: trimmed(&raw.preferred_time_range).map(str::to_string),
        is_existing_patient: raw.is_existing_patient.unwrap_or(false),
    })
}

/// Staff status change: known status, not `confirmed`, note where required.
pub fn validate_status_update(
    status: &str,
    admin_note: Option<&str>,
) -> Result<(RequestStatus, Option<String>), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let note = admin_note.map(str::trim).filter(|n| !n.is_empty());

    let parsed = RequestStatus::parse(status.trim());
    match parsed {
        None => errors.push("status", format!("unknown status {}", status)),
        Some(RequestStatus::Confirmed) => {
            errors.push("status", "use the confirmation flow to confirm a request")
        }
        Some(s) if s.requires_admin_note() && note.is_none() => {
            errors.push("adminNote", "an admin note is required for this status")
        }
        Some(_) => {}
    }

    errors.into_result((parsed.unwrap_or(RequestStatus::Pending), note.map(str::to_string)))
}

/// Confirmation input: non-blank doctor and a parseable instant.
pub fn validate_confirmation(doctor_id: &str, scheduled_for: &str) -> Result<(String, DateTime<Utc>), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let doctor = doctor_id.trim();
    if doctor.is_empty() {
        errors.push("doctorId", "doctor is required");
    }

    let when = parse_instant(scheduled_for);
    if when.is_none() {
        errors.push("scheduledFor", "a valid date and time is required");
    }

    errors.into_result((doctor.to_string(), when.unwrap_or_default()))
}

pub fn validate_link_token(token: &str) -> Result<&str, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let token = token.trim();
    if token.chars().count() < MIN_TOKEN_LEN {
        errors.push("token", "the link is not valid");
    }
    errors.into_result(token)
}

/// Listing filter from query parameters.
pub fn validate_list_filter(
    status: Option<&str>,
    search: Option<&str>,
    limit: Option<i64>,
    offset: Option<i64>,
    max_page_size: u32,
) -> Result<RequestFilter, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let status = match status.map(str::trim).filter(|s| !s.is_empty()) {
        None => None,
        Some(text) => {
            let parsed = RequestStatus::parse(text);
            if parsed.is_none() {
                errors.push("status", format!("unknown status {}", text));
            }
            parsed
        }
    };

    let limit = match limit {
        None => None,
        Some(l) if l >= 1 && l <= i64::from(max_page_size) => u32::try_from(l).ok(),
        Some(_) => {
            errors.push("limit", format!("limit must be between 1 and {}", max_page_size));
            None
        }
    };

    let offset = match offset {
        None => None,
        Some(o) => match u32::try_from(o) {
            Ok(o) => Some(o),
            Err(_) => {
                errors.push("offset", "offset must not be negative");
                None
            }
        },
    };

    errors.into_result(RequestFilter {
        status,
        search: search.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
        limit,
        offset,
    })
}

/// RFC 3339 instant, or a bare date taken as midnight UTC.
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}
