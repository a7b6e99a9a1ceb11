//! Atomic request → appointment conversion.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::{LifecycleError, LifecycleResult};
use crate::db::{appointments, requests, Database};
use crate::identity::PatientIdentityResolver;
use crate::models::{
    Appointment, AppointmentRequest, ContactCandidate, NewAppointment, Patient,
};

/// Staff input for a confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmDetails {
    pub doctor_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub admin_note: Option<String>,
    /// Verified by the authentication layer
    pub acting_user_id: Option<String>,
}

/// Everything a confirmation produced, for downstream notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub request: AppointmentRequest,
    pub appointment: Appointment,
    pub patient: Patient,
}

pub struct ConfirmationCoordinator<'a> {
    db: &'a Database,
}

impl<'a> ConfirmationCoordinator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Confirm a request: resolve the patient, create the appointment and
    /// mark the request, all in one transaction. Any non-confirmed status
    /// is accepted, including `reschedule`.
    pub fn confirm(&self, request_id: i64, details: &ConfirmDetails) -> LifecycleResult<Confirmation> {
        if details.doctor_id.trim().is_empty() {
            return Err(LifecycleError::Validation("doctor id is required".into()));
        }

        self.db.with_immediate_transaction(|tx| {
            let request = requests::get_request(tx, request_id)?
                .ok_or_else(|| LifecycleError::NotFound(format!("appointment request {}", request_id)))?;

            if request.is_confirmed() {
                warn!(request_id, "confirmation refused, request already confirmed");
                return Err(LifecycleError::InvalidState(format!(
                    "appointment request {} is already confirmed",
                    request_id
                )));
            }

            let patient = PatientIdentityResolver::new(tx).resolve(&ContactCandidate::from_request(&request), None)?;

            let admin_note = details
                .admin_note
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty());

            let mut new = NewAppointment::new(details.doctor_id.trim().to_string(), details.scheduled_for);
            new.patient_id = Some(patient.id);
            new.reason = request.symptoms.clone();
            new.additional_notes = admin_note.map(str::to_string);
            new.created_by_user = details.acting_user_id.clone();
            new.intake_payload = json!({ "requestPublicId": request.public_id });
            new.legacy_name = Some(request.full_name.clone());
            new.legacy_phone = request.phone.clone();

            let now = Utc::now();
            let appointment = appointments::insert_appointment(tx, &new, now)?;
            let request = requests::mark_confirmed(
                tx,
                request.id,
                patient.id,
                appointment.id,
                admin_note,
                patient.age,
                now,
            )?;

            info!(
                request_id = request.id,
                appointment_id = appointment.id,
                patient_id = patient.id,
                doctor_id = %appointment.doctor_id,
                "appointment request confirmed"
            );
            Ok(Confirmation {
                request,
                appointment,
                patient,
            })
        })
    }
}
