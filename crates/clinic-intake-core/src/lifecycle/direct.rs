//! Staff fast path: appointments booked without an intake request.
//!
//! These are later picked up by the reconciliation backfill.

use chrono::{DateTime, Utc};
use tracing::info;

use super::{LifecycleError, LifecycleResult};
use crate::db::{appointments, Database};
use crate::identity::PatientIdentityResolver;
use crate::models::{
    Appointment, AppointmentChannel, AppointmentPriority, ContactCandidate, NewAppointment, Patient,
    DEFAULT_DURATION_MINUTES,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DirectAppointment {
    pub doctor_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub reason: Option<String>,
    pub priority: AppointmentPriority,
    pub acting_user_id: Option<String>,
}

pub struct DirectScheduler<'a> {
    db: &'a Database,
}

impl<'a> DirectScheduler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve the patient and book an `admin`-channel appointment in one
    /// transaction.
    pub fn schedule(
        &self,
        contact: &ContactCandidate,
        booking: &DirectAppointment,
    ) -> LifecycleResult<(Patient, Appointment)> {
        if booking.doctor_id.trim().is_empty() {
            return Err(LifecycleError::Validation("doctor id is required".into()));
        }
        if booking.duration_minutes == Some(0) {
            return Err(LifecycleError::Validation("duration must be positive".into()));
        }

        self.db.with_immediate_transaction(|tx| {
            let patient = PatientIdentityResolver::new(tx).resolve(contact, None)?;

            let mut new = NewAppointment::new(booking.doctor_id.trim().to_string(), booking.scheduled_for);
            new.patient_id = Some(patient.id);
            new.duration_minutes = booking.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
            new.reason = booking.reason.clone();
            new.channel = AppointmentChannel::Admin;
            new.priority = booking.priority;
            new.created_by_user = booking.acting_user_id.clone();
            new.legacy_name = Some(patient.full_name.clone());
            new.legacy_phone = patient.phone.clone();

            let appointment = appointments::insert_appointment(tx, &new, Utc::now())?;
            info!(
                appointment_id = appointment.id,
                patient_id = patient.id,
                "appointment scheduled directly"
            );
            Ok((patient, appointment))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ReconciliationService;

    fn booking() -> DirectAppointment {
        DirectAppointment {
            doctor_id: "doc-1".into(),
            scheduled_for: Utc::now(),
            duration_minutes: None,
            reason: Some("Follow-up".into()),
            priority: AppointmentPriority::Priority,
            acting_user_id: Some("doc-1".into()),
        }
    }

    #[test]
    fn test_schedule_direct_then_backfill() {
        let db = Database::open_in_memory().unwrap();
        let mut contact = ContactCandidate::with_email("ana@example.com");
        contact.full_name = Some("Ana Ruiz".into());

        let (patient, appointment) = DirectScheduler::new(&db).schedule(&contact, &booking()).unwrap();
        assert_eq!(appointment.channel, AppointmentChannel::Admin);
        assert_eq!(appointment.priority, AppointmentPriority::Priority);
        assert_eq!(appointment.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert_eq!(appointment.patient_id, Some(patient.id));

        let backfilled = ReconciliationService::new(&db).backfill_for_patient(patient.id).unwrap();
        assert_eq!(backfilled.len(), 1);
        assert_eq!(backfilled[0].appointment_id, Some(appointment.id));
    }

    #[test]
    fn test_schedule_validates() {
        let db = Database::open_in_memory().unwrap();
        let contact = ContactCandidate::with_email("ana@example.com");

        let mut bad = booking();
        bad.doctor_id = " ".into();
        assert!(matches!(
            DirectScheduler::new(&db).schedule(&contact, &bad),
            Err(LifecycleError::Validation(_))
        ));

        let mut bad = booking();
        bad.duration_minutes = Some(0);
        assert!(matches!(
            DirectScheduler::new(&db).schedule(&contact, &bad),
            Err(LifecycleError::Validation(_))
        ));
    }
}
