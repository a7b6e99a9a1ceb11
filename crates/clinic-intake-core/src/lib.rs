//! Clinic Intake Core Library
//!
//! Appointment-request lifecycle and patient identity resolution engine.
//!
//! # Architecture
//!
//! ```text
//! Intake form ──► RequestStore ──► (pending request, link token?)
//!                      │
//!                      ├──► PatientIdentityResolver ──► Patient
//!                      │         (document id, then email; merge per field)
//!                      │
//!        ┌─────────────┼──────────────────────────┐
//!        ▼             ▼                          ▼
//!  LinkTokenManager  ConfirmationCoordinator   ReconciliationService
//!  (bind to account) (request → appointment,   (backfill requests for
//!                     one transaction)          staff-booked appointments)
//! ```
//!
//! # Core Principle
//!
//! **Every cross-record mutation is one transaction.** A confirmation either
//! produces a confirmed request, a patient and an appointment, or nothing.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence and transactions
//! - [`models`]: Domain types (Patient, AppointmentRequest, Appointment, ...)
//! - [`identity`]: Patient identity resolution and contact normalization
//! - [`lifecycle`]: Request store, link tokens, confirmation, reconciliation
//! - [`validation`]: Boundary validation of collaborator payloads
//! - [`service`]: Collaborator-facing operations with notifications
//! - [`config`]: Engine configuration

pub mod config;
pub mod db;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod service;
pub mod validation;

// Re-export commonly used types
pub use config::EngineConfig;
pub use db::Database;
pub use identity::PatientIdentityResolver;
pub use lifecycle::{
    ConfirmationCoordinator, LifecycleError, LinkOutcome, LinkTokenManager, ReconciliationService,
    RequestStore,
};
pub use models::{
    Appointment, AppointmentRequest, ContactCandidate, Gender, Patient, RequestStatus,
};
pub use service::{Caller, CallerRole, IntakeService};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use clinic_intake_notify::{Notification, Outbox};

use lifecycle::{ConfirmDetails, DirectAppointment, ErrorKind};
use models::{AppointmentPriority, DateInput, PatientSummary};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicIntakeError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<db::DbError> for ClinicIntakeError {
    fn from(e: db::DbError) -> Self {
        ClinicIntakeError::DatabaseError(e.to_string())
    }
}

impl From<LifecycleError> for ClinicIntakeError {
    fn from(e: LifecycleError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => ClinicIntakeError::NotFound(e.to_string()),
            ErrorKind::InvalidState => ClinicIntakeError::InvalidState(e.to_string()),
            ErrorKind::Validation => ClinicIntakeError::InvalidInput(e.to_string()),
            ErrorKind::Persistence => ClinicIntakeError::DatabaseError(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ClinicIntakeError {
    fn from(e: anyhow::Error) -> Self {
        ClinicIntakeError::ConfigError(format!("{:#}", e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicIntakeError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ClinicIntakeError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path with default settings.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<ClinicIntakeCore>, ClinicIntakeError> {
    let config = EngineConfig {
        database_path: path,
        ..Default::default()
    };
    let db = Database::open_with_config(&config)?;
    Ok(ClinicIntakeCore::new(db, config))
}

/// Open the database described by a JSON configuration document.
#[uniffi::export]
pub fn open_database_with_config(config_json: String) -> Result<Arc<ClinicIntakeCore>, ClinicIntakeError> {
    let config = EngineConfig::from_json_str(&config_json)?;
    let db = Database::open_with_config(&config)?;
    Ok(ClinicIntakeCore::new(db, config))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<ClinicIntakeCore>, ClinicIntakeError> {
    let db = Database::open_in_memory()?;
    Ok(ClinicIntakeCore::new(db, EngineConfig::default()))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine handle for FFI.
///
/// Outbound messages are queued; the host drains them with
/// [`ClinicIntakeCore::take_pending_notifications`] and delivers them.
#[derive(uniffi::Object)]
pub struct ClinicIntakeCore {
    db: Arc<Mutex<Database>>,
    config: EngineConfig,
    outbox: Arc<Outbox>,
}

impl ClinicIntakeCore {
    fn new(db: Database, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            config,
            outbox: Arc::new(Outbox::new()),
        })
    }

    fn with_service<T>(
        &self,
        f: impl FnOnce(&IntakeService<'_>) -> Result<T, ClinicIntakeError>,
    ) -> Result<T, ClinicIntakeError> {
        let db = self.db.lock()?;
        let service = IntakeService::new(&db, &self.config, self.outbox.as_ref());
        f(&service)
    }
}

#[uniffi::export]
impl ClinicIntakeCore {
    // =========================================================================
    // Request Operations
    // =========================================================================

    /// Submit an intake form. `caller` is the authenticated user, if any.
    pub fn create_request(
        &self,
        intake: FfiIntake,
        caller: Option<FfiCaller>,
    ) -> Result<FfiCreatedRequest, ClinicIntakeError> {
        let caller = caller.map(Caller::try_from).transpose()?;
        self.with_service(|service| {
            let created = service.create_request(&intake.into(), caller.as_ref())?;
            Ok(FfiCreatedRequest {
                request: created.request.into(),
                link_token: created.link_token,
                linked_to_user: created.linked_to_user,
            })
        })
    }

    /// Staff listing; `status` and `search` are optional filters.
    pub fn list_requests(
        &self,
        status: Option<String>,
        search: Option<String>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<FfiRequest>, ClinicIntakeError> {
        let filter = validation::validate_list_filter(
            status.as_deref(),
            search.as_deref(),
            limit,
            offset,
            self.config.max_page_size,
        )
        .map_err(|e| ClinicIntakeError::InvalidInput(e.to_string()))?;

        self.with_service(|service| {
            let requests = service.list_requests(&filter)?;
            Ok(requests.into_iter().map(|r| r.into()).collect())
        })
    }

    /// Get a request by public ID.
    pub fn get_request(&self, public_id: String) -> Result<FfiRequest, ClinicIntakeError> {
        self.with_service(|service| Ok(service.get_request_by_public_id(&public_id)?.into()))
    }

    /// Reject, reschedule or reopen a request.
    pub fn update_request_status(
        &self,
        public_id: String,
        status: String,
        admin_note: Option<String>,
    ) -> Result<FfiRequest, ClinicIntakeError> {
        let (status, note) = validation::validate_status_update(&status, admin_note.as_deref())
            .map_err(|e| ClinicIntakeError::InvalidInput(e.to_string()))?;

        self.with_service(|service| {
            let request = service.get_request_by_public_id(&public_id)?;
            Ok(service
                .update_request_status(request.id, status, note.as_deref())?
                .into())
        })
    }

    /// Convert a request into an appointment. `scheduled_for` is RFC 3339.
    pub fn confirm_request(
        &self,
        public_id: String,
        doctor_id: String,
        scheduled_for: String,
        admin_note: Option<String>,
        acting_user_id: Option<String>,
    ) -> Result<FfiConfirmation, ClinicIntakeError> {
        let (doctor_id, scheduled_for) = validation::validate_confirmation(&doctor_id, &scheduled_for)
            .map_err(|e| ClinicIntakeError::InvalidInput(e.to_string()))?;
        let details = ConfirmDetails {
            doctor_id,
            scheduled_for,
            admin_note,
            acting_user_id,
        };

        self.with_service(|service| {
            let request = service.get_request_by_public_id(&public_id)?;
            let confirmation = service.confirm_request(request.id, &details)?;
            Ok(FfiConfirmation {
                request: confirmation.request.into(),
                appointment: confirmation.appointment.into(),
                patient: confirmation.patient.into(),
            })
        })
    }

    /// Requests owned by an account; confirmed ones only when asked for.
    pub fn list_requests_for_user(
        &self,
        user_id: String,
        include_confirmed: bool,
    ) -> Result<Vec<FfiRequest>, ClinicIntakeError> {
        let all = [
            RequestStatus::Pending,
            RequestStatus::Confirmed,
            RequestStatus::Rejected,
            RequestStatus::Reschedule,
        ];
        let statuses = include_confirmed.then_some(&all[..]);

        self.with_service(|service| {
            let requests = service.list_requests_for_identity(&models::IdentityKey::User(user_id), statuses)?;
            Ok(requests.into_iter().map(|r| r.into()).collect())
        })
    }

    // =========================================================================
    // Link Token Operations
    // =========================================================================

    /// Preview the request behind a link token without consuming it.
    pub fn resolve_link_token(&self, token: String) -> Result<FfiLinkPreview, ClinicIntakeError> {
        self.with_service(|service| {
            let preview = service.resolve_link_token(&token)?;
            Ok(FfiLinkPreview {
                request: preview.request.into(),
                expired: preview.expired,
            })
        })
    }

    /// Bind a request to an account. The outcome is one of `LINKED`,
    /// `ALREADY_LINKED`, `ALREADY_LINKED_OTHER`, `EXPIRED`, `NOT_FOUND`.
    pub fn consume_link_token(&self, token: String, user_id: String) -> Result<FfiLinkResult, ClinicIntakeError> {
        self.with_service(|service| {
            let result = service.consume_link_token(&token, &user_id)?;
            Ok(FfiLinkResult {
                outcome: result.outcome.as_str().to_string(),
                request: result.request.map(|r| r.into()),
            })
        })
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Registration identity flow for an account's contact data.
    pub fn ensure_patient_identity(&self, contact: FfiContact) -> Result<FfiIdentityLink, ClinicIntakeError> {
        self.with_service(|service| {
            let link = service.ensure_patient_identity(&contact.into())?;
            Ok(FfiIdentityLink {
                patient: link.patient.into(),
                linked_requests: saturating_u32(link.linked_requests),
                backfilled: link.backfilled.into_iter().map(|r| r.into()).collect(),
            })
        })
    }

    /// Synthesize requests for the patient's appointments that have none.
    pub fn backfill_for_patient(&self, patient_public_id: String) -> Result<Vec<FfiRequest>, ClinicIntakeError> {
        self.with_service(|service| {
            let patient = service.get_patient_by_public_id(&patient_public_id)?;
            let created = service.backfill_for_patient(patient.id)?;
            Ok(created.into_iter().map(|r| r.into()).collect())
        })
    }

    /// Get a patient by public ID.
    pub fn get_patient(&self, public_id: String) -> Result<FfiPatient, ClinicIntakeError> {
        self.with_service(|service| Ok(service.get_patient_by_public_id(&public_id)?.into()))
    }

    /// Patient directory search by name, email or document id.
    pub fn search_patients(
        &self,
        query: Option<String>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<FfiPatientSummary>, ClinicIntakeError> {
        self.with_service(|service| {
            let rows = service.search_patients(query.as_deref(), limit, offset)?;
            Ok(rows.into_iter().map(|r| r.into()).collect())
        })
    }

    /// Appointments of a patient, latest first.
    pub fn list_patient_appointments(&self, patient_public_id: String) -> Result<Vec<FfiAppointment>, ClinicIntakeError> {
        self.with_service(|service| {
            let patient = service.get_patient_by_public_id(&patient_public_id)?;
            let appointments = service.appointments_for_patient(patient.id)?;
            Ok(appointments.into_iter().map(|a| a.into()).collect())
        })
    }

    /// Staff fast path: book an appointment without an intake request.
    pub fn schedule_direct_appointment(
        &self,
        contact: FfiContact,
        booking: FfiDirectBooking,
    ) -> Result<FfiAppointment, ClinicIntakeError> {
        let booking = DirectAppointment::try_from(booking)?;
        self.with_service(|service| {
            let (_, appointment) = service.schedule_direct_appointment(&contact.into(), &booking)?;
            Ok(appointment.into())
        })
    }

    // =========================================================================
    // Notification Operations
    // =========================================================================

    /// Take every queued notification for delivery by the host.
    pub fn take_pending_notifications(&self) -> Vec<FfiNotification> {
        self.outbox.drain().into_iter().map(|n| n.into()).collect()
    }
}

// =========================================================================
// FFI Types
// =========================================================================

fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn instant_text(instant: Option<DateTime<Utc>>) -> Option<String> {
    instant.map(|i| i.to_rfc3339())
}

/// FFI-safe intake form. Everything is optional; validation reports what is missing.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiIntake {
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

impl From<FfiIntake> for validation::RawIntake {
    fn from(intake: FfiIntake) -> Self {
        validation::RawIntake {
            full_name: intake.full_name,
            email: intake.email,
            phone: intake.phone,
            document_id: intake.document_id,
            birth_date: intake.birth_date,
            gender: intake.gender,
            age: intake.age,
            symptoms: intake.symptoms,
            preferred_date: intake.preferred_date,
            preferred_time_range: intake.preferred_time_range,
            is_existing_patient: intake.is_existing_patient,
        }
    }
}

/// FFI-safe authenticated caller; `role` is `patient`, `doctor` or `admin`.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCaller {
    pub user_id: String,
    pub role: String,
}

impl TryFrom<FfiCaller> for Caller {
    type Error = ClinicIntakeError;

    fn try_from(caller: FfiCaller) -> Result<Self, Self::Error> {
        let role = match caller.role.trim().to_lowercase().as_str() {
            "patient" => CallerRole::Patient,
            "doctor" => CallerRole::Doctor,
            "admin" => CallerRole::Admin,
            other => return Err(ClinicIntakeError::InvalidInput(format!("unknown role {}", other))),
        };
        Ok(Caller {
            user_id: caller.user_id,
            role,
        })
    }
}

/// FFI-safe contact data for identity resolution.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiContact {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i64>,
}

impl From<FfiContact> for ContactCandidate {
    fn from(contact: FfiContact) -> Self {
        ContactCandidate {
            full_name: contact.full_name,
            phone: contact.phone,
            email: contact.email,
            document_id: contact.document_id,
            birth_date: contact.birth_date.map(DateInput::Text),
            gender: contact.gender,
            age: contact.age,
        }
    }
}

/// FFI-safe direct booking; `priority` is `routine`, `priority` or `emergency`.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDirectBooking {
    pub doctor_id: String,
    pub scheduled_for: String,
    pub duration_minutes: Option<u32>,
    pub reason: Option<String>,
    pub priority: Option<String>,
    pub acting_user_id: Option<String>,
}

impl TryFrom<FfiDirectBooking> for DirectAppointment {
    type Error = ClinicIntakeError;

    fn try_from(booking: FfiDirectBooking) -> Result<Self, Self::Error> {
        let (doctor_id, scheduled_for) = validation::validate_confirmation(&booking.doctor_id, &booking.scheduled_for)
            .map_err(|e| ClinicIntakeError::InvalidInput(e.to_string()))?;
        let priority = match booking.priority.as_deref() {
            None => AppointmentPriority::Routine,
            Some(p) => AppointmentPriority::parse(p.trim())
                .ok_or_else(|| ClinicIntakeError::InvalidInput(format!("unknown priority {}", p)))?,
        };
        Ok(DirectAppointment {
            doctor_id,
            scheduled_for,
            duration_minutes: booking.duration_minutes,
            reason: booking.reason,
            priority,
            acting_user_id: booking.acting_user_id,
        })
    }
}

/// FFI-safe appointment request. Internal ids and the link token stay inside.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRequest {
    pub public_id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub age: Option<u32>,
    pub symptoms: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time_range: Option<String>,
    pub is_existing_patient: bool,
    pub status: String,
    pub admin_note: Option<String>,
    pub token_expires_at: Option<String>,
    pub user_id: Option<String>,
    pub has_patient: bool,
    pub has_appointment: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<AppointmentRequest> for FfiRequest {
    fn from(request: AppointmentRequest) -> Self {
        Self {
            public_id: request.public_id,
            full_name: request.full_name,
            email: request.email,
            phone: request.phone,
            document_id: request.document_id,
            birth_date: date_text(request.birth_date),
            gender: request.gender.map(|g| g.as_str().to_string()),
            age: request.age,
            symptoms: request.symptoms,
            preferred_date: instant_text(request.preferred_date),
            preferred_time_range: request.preferred_time_range,
            is_existing_patient: request.is_existing_patient,
            status: request.status.as_str().to_string(),
            admin_note: request.admin_note,
            token_expires_at: instant_text(request.token_expires_at),
            user_id: request.user_id,
            has_patient: request.patient_id.is_some(),
            has_appointment: request.appointment_id.is_some(),
            created_at: request.created_at.to_rfc3339(),
            updated_at: request.updated_at.to_rfc3339(),
        }
    }
}

/// FFI-safe result of an intake submission.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCreatedRequest {
    pub request: FfiRequest,
    pub link_token: Option<String>,
    pub linked_to_user: bool,
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub public_id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub age: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            public_id: patient.public_id,
            full_name: patient.full_name,
            phone: patient.phone,
            email: patient.email,
            document_id: patient.document_id,
            birth_date: date_text(patient.birth_date),
            gender: patient.gender.map(|g| g.as_str().to_string()),
            age: patient.age,
            created_at: patient.created_at.to_rfc3339(),
            updated_at: patient.updated_at.to_rfc3339(),
        }
    }
}

/// FFI-safe patient directory row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatientSummary {
    pub patient: FfiPatient,
    pub appointments_count: u32,
    pub last_appointment_at: Option<String>,
}

impl From<PatientSummary> for FfiPatientSummary {
    fn from(row: PatientSummary) -> Self {
        Self {
            patient: row.patient.into(),
            appointments_count: row.appointments_count,
            last_appointment_at: instant_text(row.last_appointment_at),
        }
    }
}

/// FFI-safe appointment.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAppointment {
    pub public_id: String,
    pub doctor_id: String,
    pub scheduled_for: String,
    pub duration_minutes: u32,
    pub reason: Option<String>,
    pub additional_notes: Option<String>,
    pub channel: String,
    pub priority: String,
    pub status: String,
}

impl From<Appointment> for FfiAppointment {
    fn from(appt: Appointment) -> Self {
        Self {
            public_id: appt.public_id,
            doctor_id: appt.doctor_id,
            scheduled_for: appt.scheduled_for.to_rfc3339(),
            duration_minutes: appt.duration_minutes,
            reason: appt.reason,
            additional_notes: appt.additional_notes,
            channel: appt.channel.as_str().to_string(),
            priority: appt.priority.as_str().to_string(),
            status: appt.status.as_str().to_string(),
        }
    }
}

/// FFI-safe confirmation result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiConfirmation {
    pub request: FfiRequest,
    pub appointment: FfiAppointment,
    pub patient: FfiPatient,
}

/// FFI-safe link preview.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLinkPreview {
    pub request: FfiRequest,
    pub expired: bool,
}

/// FFI-safe link outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLinkResult {
    pub outcome: String,
    pub request: Option<FfiRequest>,
}

/// FFI-safe registration identity result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiIdentityLink {
    pub patient: FfiPatient,
    pub linked_requests: u32,
    pub backfilled: Vec<FfiRequest>,
}

/// FFI-safe outbound message.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl From<Notification> for FfiNotification {
    fn from(n: Notification) -> Self {
        Self {
            recipient: n.recipient,
            subject: n.subject,
            body: n.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake() -> FfiIntake {
        FfiIntake {
            full_name: Some("Ana Ruiz".into()),
            email: Some("ana@example.com".into()),
            phone: Some("555-1111".into()),
            document_id: Some("D-10001".into()),
            birth_date: Some("1990-05-17".into()),
            gender: Some("female".into()),
            age: None,
            symptoms: Some("Persistent cough".into()),
            preferred_date: None,
            preferred_time_range: None,
            is_existing_patient: Some(true),
        }
    }

    #[test]
    fn test_ffi_request_flow() {
        let core = open_database_in_memory().unwrap();
        let created = core.create_request(intake(), None).unwrap();
        let token = created.link_token.clone().unwrap();
        assert!(created.request.has_patient);

        let preview = core.resolve_link_token(token.clone()).unwrap();
        assert_eq!(preview.request.public_id, created.request.public_id);

        let linked = core.consume_link_token(token.clone(), "user-1".into()).unwrap();
        assert_eq!(linked.outcome, "LINKED");
        let again = core.consume_link_token(token, "user-1".into()).unwrap();
        assert_eq!(again.outcome, "ALREADY_LINKED");

        let confirmation = core
            .confirm_request(
                created.request.public_id.clone(),
                "doc-1".into(),
                "2030-01-15T10:00:00Z".into(),
                None,
                None,
            )
            .unwrap();
        assert_eq!(confirmation.request.status, "confirmed");
        assert!(confirmation.request.has_appointment);

        let mine = core.list_requests_for_user("user-1".into(), true).unwrap();
        assert_eq!(mine.len(), 1);
        assert!(core.list_requests_for_user("user-1".into(), false).unwrap().is_empty());

        let sent = core.take_pending_notifications();
        assert_eq!(sent.len(), 2);
        assert!(core.take_pending_notifications().is_empty());
    }

    #[test]
    fn test_ffi_errors_map_to_kinds() {
        let core = open_database_in_memory().unwrap();
        assert!(matches!(
            core.get_request("missing".into()),
            Err(ClinicIntakeError::NotFound(_))
        ));
        assert!(matches!(
            core.update_request_status("missing".into(), "rejected".into(), None),
            Err(ClinicIntakeError::InvalidInput(_))
        ));
        assert!(matches!(
            core.list_requests(None, None, Some(0), None),
            Err(ClinicIntakeError::InvalidInput(_))
        ));
        assert!(matches!(
            core.create_request(
                intake(),
                Some(FfiCaller {
                    user_id: "u".into(),
                    role: "superuser".into()
                })
            ),
            Err(ClinicIntakeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ffi_direct_booking_and_backfill() {
        let core = open_database_in_memory().unwrap();
        let contact = FfiContact {
            full_name: Some("Luis Gomez".into()),
            phone: None,
            email: Some("luis@example.com".into()),
            document_id: None,
            birth_date: Some("1985/02/01".into()),
            gender: None,
            age: None,
        };
        let booking = FfiDirectBooking {
            doctor_id: "doc-2".into(),
            scheduled_for: "2030-03-01".into(),
            duration_minutes: Some(45),
            reason: Some("Follow-up".into()),
            priority: Some("emergency".into()),
            acting_user_id: Some("doc-2".into()),
        };
        let appointment = core.schedule_direct_appointment(contact.clone(), booking).unwrap();
        assert_eq!(appointment.channel, "admin");
        assert_eq!(appointment.priority, "emergency");

        let link = core.ensure_patient_identity(contact).unwrap();
        assert_eq!(link.backfilled.len(), 1);
        assert_eq!(link.patient.birth_date.as_deref(), Some("1985-02-01"));

        let appointments = core.list_patient_appointments(link.patient.public_id.clone()).unwrap();
        assert_eq!(appointments.len(), 1);
        assert!(core.backfill_for_patient(link.patient.public_id).unwrap().is_empty());
    }

    #[test]
    fn test_ffi_direct_booking_rejects_unknown_priority() {
        let core = open_database_in_memory().unwrap();
        let contact = FfiContact {
            full_name: Some("Luis Gomez".into()),
            phone: None,
            email: Some("luis@example.com".into()),
            document_id: None,
            birth_date: None,
            gender: None,
            age: None,
        };
        let booking = FfiDirectBooking {
            doctor_id: "doc-2".into(),
            scheduled_for: "2030-03-01".into(),
            duration_minutes: None,
            reason: None,
            priority: Some("urgent".into()),
            acting_user_id: None,
        };
        assert!(matches!(
            core.schedule_direct_appointment(contact, booking),
            Err(ClinicIntakeError::InvalidInput(_))
        ));
        assert!(core.search_patients(None, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_counts_saturate_at_u32_max() {
        assert_eq!(saturating_u32(7), 7);
        assert_eq!(saturating_u32(usize::MAX), u32::MAX);
    }

    #[test]
    fn test_open_with_bad_config() {
        assert!(matches!(
            open_database_with_config(r#"{"link_token_ttl_hours": 0}"#.into()),
            Err(ClinicIntakeError::ConfigError(_))
        ));
    }
}
