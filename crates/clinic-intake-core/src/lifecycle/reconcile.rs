//! Backfill of request records for appointments booked outside intake.

use rusqlite::Connection;
use tracing::{info, warn};

use super::{LifecycleError, LifecycleResult};
use crate::db::requests::BackfillRequest;
use crate::db::{appointments, patients, requests, Database};
use crate::models::AppointmentRequest;

/// Admin note stamped on every synthesized request.
pub const BACKFILL_NOTE: &str =
    "Generated automatically when linking the appointment with the registered patient.";

pub struct ReconciliationService<'a> {
    db: &'a Database,
}

impl<'a> ReconciliationService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create one request per appointment of the patient that has none.
    /// Returns only the newly created requests; a second run returns none.
    pub fn backfill_for_patient(&self, patient_id: i64) -> LifecycleResult<Vec<AppointmentRequest>> {
        self.db
            .with_immediate_transaction(|tx| backfill_in(tx, patient_id, None))
    }
}

/// Backfill on an existing connection or transaction. `fallback_email`
/// stands in when the patient row has no email; with neither, nothing is
/// backfilled.
pub(crate) fn backfill_in(
    conn: &Connection,
    patient_id: i64,
    fallback_email: Option<&str>,
) -> LifecycleResult<Vec<AppointmentRequest>> {
    let patient = patients::get_patient(conn, patient_id)?
        .ok_or_else(|| LifecycleError::NotFound(format!("patient {}", patient_id)))?;

    let Some(email) = patient
        .email
        .clone()
        .or_else(|| fallback_email.map(str::to_string))
        .filter(|e| !e.trim().is_empty())
    else {
        warn!(patient_id, "backfill skipped, patient has no email");
        return Ok(Vec::new());
    };

    let mut created = Vec::new();
    for appt in appointments::list_unlinked_for_patient(conn, patient_id)? {
        let backfill = BackfillRequest {
            full_name: appt
                .legacy_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| patient.full_name.clone()),
            email: email.clone(),
            phone: appt.legacy_phone.clone().or_else(|| patient.phone.clone()),
            document_id: patient.document_id.clone(),
            birth_date: patient.birth_date,
            gender: patient.gender,
            age: patient.age,
            symptoms: appt.reason.clone(),
            preferred_date: appt.scheduled_for,
            status: appt.status.backfill_request_status(),
            admin_note: BACKFILL_NOTE.to_string(),
            patient_id,
            appointment_id: appt.id,
        };

        if let Some(request) = requests::insert_backfill(conn, &backfill, appt.created_at)? {
            info!(
                request_id = request.id,
                appointment_id = appt.id,
                patient_id,
                status = request.status.as_str(),
                "request backfilled"
            );
            created.push(request);
        }
    }
    Ok(created)
}
