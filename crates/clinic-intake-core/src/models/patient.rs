//! Patient identity records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Gender allow-list. Anything else is treated as absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    /// Case- and whitespace-insensitive parse; `None` for values outside the allow-list.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// The durable identity anchor for a clinic client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Internal row id (never leaves the engine)
    pub id: i64,
    /// Externally shareable UUID
    pub public_id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// National document number, unique when present
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    /// Denormalized, recomputed from birth date when available
    pub age: Option<u32>,
    pub preferred_channel: Option<String>,
    /// Free-form JSON object
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile values written by the identity resolver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientProfile {
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
}

/// Patient directory row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientSummary {
    pub patient: Patient,
    pub appointments_count: u32,
    pub last_appointment_at: Option<DateTime<Utc>>,
}
