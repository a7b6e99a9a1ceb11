//! Collaborator-facing operations.
//!
//! `IntakeService` validates payloads, drives the lifecycle components and
//! sends notifications once the work is committed. Notification failures
//! are logged and never undo a workflow step.

use chrono::Utc;
use clinic_intake_notify::{
    format_recipient, redirect_to_test_inbox, request_confirmed, request_received, request_status_changed,
    Delivery, LinkBuilder, Notification, Notifier, RecipientRole,
};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::{requests, Database};
use crate::identity::{is_plausible_email, ContactNormalizer, PatientIdentityResolver};
use crate::lifecycle::{
    backfill_in, ConfirmDetails, Confirmation, ConfirmationCoordinator, DirectAppointment, DirectScheduler,
    LifecycleError, LifecycleResult, LinkOutcome, LinkPreview, LinkResult, LinkTokenManager,
    ReconciliationService, RequestStore,
};
use crate::models::{
    Appointment, AppointmentRequest, ContactCandidate, DateInput, IdentityKey, IntakeSubmission, Patient,
    PatientSummary, RequestFilter, RequestStatus,
};
use crate::validation::{self, RawIntake};

/// Role of an authenticated caller, as reported by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    Patient,
    Doctor,
    Admin,
}

/// An already-verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: CallerRole,
}

/// Result of an intake submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRequest {
    pub request: AppointmentRequest,
    /// Raw link token; only ever handed out here and in the notification
    pub link_token: Option<String>,
    pub linked_to_user: bool,
}

/// Result of the registration identity flow.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityLink {
    pub patient: Patient,
    /// Requests that got the patient id attached
    pub linked_requests: usize,
    /// Requests synthesized for appointments booked outside intake
    pub backfilled: Vec<AppointmentRequest>,
}

pub struct IntakeService<'a> {
    db: &'a Database,
    config: &'a EngineConfig,
    notifier: &'a dyn Notifier,
}

impl<'a> IntakeService<'a> {
    pub fn new(db: &'a Database, config: &'a EngineConfig, notifier: &'a dyn Notifier) -> Self {
        Self { db, config, notifier }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Store an intake submission.
    ///
    /// A logged-in patient is always treated as an existing patient. When a
    /// caller is present, their other open requests for the same email are
    /// attached to the account. The identity flow then runs for the
    /// submitted contact data.
    pub fn create_request(&self, raw: &RawIntake, caller: Option<&Caller>) -> LifecycleResult<CreatedRequest> {
        let mut raw = raw.clone();
        if caller.is_some_and(|c| c.role == CallerRole::Patient) {
            raw.is_existing_patient = Some(true);
        }

        let submission = validation::validate_intake(&raw, Utc::now().date_naive())?;
        let store = RequestStore::with_config(self.db, self.config);
        let (request, link_token) = store.create(&submission)?;

        if let Some(caller) = caller {
            store.assign_user(&submission.email, &caller.user_id)?;
        }

        self.ensure_patient_identity(&candidate_from_submission(&submission))?;
        let request = store.get(request.id)?;

        self.send(self.received_notification(&request, link_token.as_deref()));

        Ok(CreatedRequest {
            request,
            link_token,
            linked_to_user: caller.is_some(),
        })
    }

    pub fn list_requests(&self, filter: &RequestFilter) -> LifecycleResult<Vec<AppointmentRequest>> {
        RequestStore::with_config(self.db, self.config).list(filter)
    }

    /// A person's own request history.
    pub fn list_requests_for_identity(
        &self,
        key: &IdentityKey,
        statuses: Option<&[RequestStatus]>,
    ) -> LifecycleResult<Vec<AppointmentRequest>> {
        RequestStore::with_config(self.db, self.config).list_for_identity(key, statuses)
    }

    pub fn get_request(&self, id: i64) -> LifecycleResult<AppointmentRequest> {
        RequestStore::with_config(self.db, self.config).get(id)
    }

    pub fn get_request_by_public_id(&self, public_id: &str) -> LifecycleResult<AppointmentRequest> {
        RequestStore::with_config(self.db, self.config).get_by_public_id(public_id)
    }

    /// Staff status change, followed by a "status changed" message.
    pub fn update_request_status(
        &self,
        id: i64,
        status: RequestStatus,
        admin_note: Option<&str>,
    ) -> LifecycleResult<AppointmentRequest> {
        let request = RequestStore::with_config(self.db, self.config).update_status(id, status, admin_note)?;

        let notification = format_recipient(&request.email, Some(&request.full_name), RecipientRole::Patient)
            .and_then(|recipient| {
                let login = self.login_url()?;
                Some(request_status_changed(
                    recipient,
                    &request.full_name,
                    request.status.as_str(),
                    request.admin_note.as_deref(),
                    &login,
                ))
            });
        self.send(notification);

        Ok(request)
    }

    /// Convert a request into an appointment, then notify the patient.
    pub fn confirm_request(&self, id: i64, details: &ConfirmDetails) -> LifecycleResult<Confirmation> {
        let confirmation = ConfirmationCoordinator::new(self.db).confirm(id, details)?;

        let request = &confirmation.request;
        let notification = format_recipient(&request.email, Some(&request.full_name), RecipientRole::Patient)
            .and_then(|recipient| {
                let login = self.login_url()?;
                Some(request_confirmed(
                    recipient,
                    &request.full_name,
                    &confirmation.appointment.scheduled_for.to_rfc3339(),
                    &confirmation.appointment.doctor_id,
                    &login,
                ))
            });
        self.send(notification);

        Ok(confirmation)
    }

    // =========================================================================
    // Link tokens
    // =========================================================================

    pub fn resolve_link_token(&self, token: &str) -> LifecycleResult<LinkPreview> {
        let token = validation::validate_link_token(token)?;
        LinkTokenManager::with_config(self.db, self.config).resolve(token)
    }

    /// Consume a link token for `user_id`.
    ///
    /// On `Linked` and `AlreadyLinked` the account also picks up the other
    /// open requests for the same email, and the identity flow runs.
    pub fn consume_link_token(&self, token: &str, user_id: &str) -> LifecycleResult<LinkResult> {
        let token = validation::validate_link_token(token)?;
        let result = LinkTokenManager::with_config(self.db, self.config).consume(token, user_id)?;

        if !matches!(result.outcome, LinkOutcome::Linked | LinkOutcome::AlreadyLinked) {
            return Ok(result);
        }

        if let Some(request) = result.request.as_ref().filter(|r| is_plausible_email(r.email.trim())) {
            RequestStore::with_config(self.db, self.config).assign_user(&request.email, user_id)?;

            let mut candidate = ContactCandidate::with_email(&request.email);
            candidate.full_name = Some(request.full_name.clone());
            self.ensure_patient_identity(&candidate)?;
        } else {
            debug!(outcome = ?result.outcome, "linked request has no usable email");
        }

        Ok(result)
    }

    // =========================================================================
    // Patients
    // =========================================================================

    /// Registration identity flow, in one transaction: resolve the patient
    /// using the latest request for the email as history, attach the patient
    /// to that email's requests, then backfill appointments booked outside
    /// intake.
    pub fn ensure_patient_identity(&self, contact: &ContactCandidate) -> LifecycleResult<IdentityLink> {
        let email = ContactNormalizer::new()
            .email(contact.email.as_deref())
            .ok_or_else(|| LifecycleError::Validation("a valid email is required".into()))?;

        self.db.with_immediate_transaction(|tx| {
            let patient = PatientIdentityResolver::new(tx).resolve_for_registration(contact)?;
            let linked_requests = requests::link_patient_by_email(tx, &email, patient.id, Utc::now())?;
            let backfilled = backfill_in(tx, patient.id, Some(&email))?;

            info!(
                patient_id = patient.id,
                linked_requests,
                backfilled = backfilled.len(),
                "patient identity ensured"
            );
            Ok(IdentityLink {
                patient,
                linked_requests,
                backfilled,
            })
        })
    }

    pub fn backfill_for_patient(&self, patient_id: i64) -> LifecycleResult<Vec<AppointmentRequest>> {
        ReconciliationService::new(self.db).backfill_for_patient(patient_id)
    }

    pub fn schedule_direct_appointment(
        &self,
        contact: &ContactCandidate,
        booking: &DirectAppointment,
    ) -> LifecycleResult<(Patient, Appointment)> {
        DirectScheduler::new(self.db).schedule(contact, booking)
    }

    pub fn get_patient(&self, id: i64) -> LifecycleResult<Patient> {
        self.db
            .get_patient(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("patient {}", id)))
    }

    pub fn get_patient_by_public_id(&self, public_id: &str) -> LifecycleResult<Patient> {
        self.db
            .get_patient_by_public_id(public_id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("patient {}", public_id)))
    }

    /// Patient directory, most recently updated first.
    pub fn search_patients(
        &self,
        query: Option<&str>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> LifecycleResult<Vec<PatientSummary>> {
        let limit = limit.unwrap_or(self.config.default_page_size);
        if limit == 0 || limit > self.config.max_page_size {
            return Err(LifecycleError::Validation(format!(
                "limit must be between 1 and {}",
                self.config.max_page_size
            )));
        }

        let query = query.map(str::trim).filter(|q| !q.is_empty());
        Ok(self.db.search_patients(query, limit, offset.unwrap_or(0))?)
    }

    pub fn appointments_for_patient(&self, patient_id: i64) -> LifecycleResult<Vec<Appointment>> {
        self.get_patient(patient_id)?;
        Ok(self.db.list_appointments_for_patient(patient_id)?)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    fn links(&self) -> Option<LinkBuilder> {
        match LinkBuilder::new(&self.config.frontend_base_url) {
            Ok(links) => Some(links),
            Err(e) => {
                warn!(base = %self.config.frontend_base_url, error = %e, "cannot build frontend links");
                None
            }
        }
    }

    fn login_url(&self) -> Option<String> {
        self.links()?
            .login()
            .map_err(|e| warn!(error = %e, "cannot build login link"))
            .ok()
    }

    fn received_notification(&self, request: &AppointmentRequest, link_token: Option<&str>) -> Option<Notification> {
        let recipient = format_recipient(&request.email, Some(&request.full_name), RecipientRole::Patient)?;
        let links = self
            .links()?
            .intake_links(&request.email, link_token)
            .map_err(|e| warn!(error = %e, "cannot build intake links"))
            .ok()?;
        Some(request_received(recipient, &request.full_name, &links))
    }

    fn send(&self, notification: Option<Notification>) {
        let Some(notification) = notification else {
            warn!("notification skipped");
            return;
        };

        let notification = match self.config.test_recipient.as_deref() {
            Some(inbox) => redirect_to_test_inbox(&notification, inbox),
            None => notification,
        };

        match self.notifier.notify(&notification) {
            Delivery::Delivered { transport } => {
                debug!(transport = %transport, subject = %notification.subject, "notification sent")
            }
            Delivery::Failed { reason } => {
                warn!(reason = %reason, subject = %notification.subject, "notification not delivered")
            }
        }
    }
}

fn candidate_from_submission(submission: &IntakeSubmission) -> ContactCandidate {
    ContactCandidate {
        full_name: Some(submission.full_name.clone()),
        phone: submission.phone.clone(),
        email: Some(submission.email.clone()),
        document_id: submission.document_id.clone(),
        birth_date: submission.birth_date.map(DateInput::Date),
        gender: submission.gender.map(|g| g.as_str().to_string()),
        age: submission.age.map(i64::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::appointments::insert_appointment;
    use crate::models::{AppointmentStatus, NewAppointment};
    use chrono::Duration;
    use clinic_intake_notify::Outbox;

    struct DownNotifier;

    impl Notifier for DownNotifier {
        fn notify(&self, _notification: &Notification) -> Delivery {
            Delivery::Failed {
                reason: "mail relay down".into(),
            }
        }
    }

    fn raw_intake(email: &str) -> RawIntake {
        RawIntake {
            full_name: Some("Ana Ruiz".into()),
            email: Some(email.into()),
            phone: Some("555-1111".into()),
            document_id: Some("D-10001".into()),
            birth_date: Some("1990-05-17".into()),
            gender: Some("female".into()),
            symptoms: Some("Persistent cough".into()),
            ..Default::default()
        }
    }

    fn patient_caller() -> Caller {
        Caller {
            user_id: "user-1".into(),
            role: CallerRole::Patient,
        }
    }

    #[test]
    fn test_create_request_runs_identity_flow_and_notifies() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        let created = service.create_request(&raw_intake("ana@example.com"), None).unwrap();
        assert!(created.link_token.is_none());
        assert!(!created.linked_to_user);

        let request = service.get_request(created.request.id).unwrap();
        let patient = service.get_patient(request.patient_id.unwrap()).unwrap();
        assert_eq!(patient.document_id.as_deref(), Some("D-10001"));

        let sent = outbox.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "Patient Ana Ruiz <ana@example.com>");
        assert!(sent[0].body.contains("http://localhost:4321/signup?email=ana%40example.com"));
    }

    #[test]
    fn test_patient_caller_gets_token_and_assignment() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        let created = service
            .create_request(&raw_intake("ana@example.com"), Some(&patient_caller()))
            .unwrap();
        let token = created.link_token.unwrap();
        assert!(created.linked_to_user);

        let request = service.get_request(created.request.id).unwrap();
        assert_eq!(request.user_id.as_deref(), Some("user-1"));
        assert!(outbox.drain()[0].body.contains(&format!("link-appointment?token={}", token)));
    }

    #[test]
    fn test_invalid_intake_persists_nothing() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        let mut raw = raw_intake("ana@example.com");
        raw.symptoms = Some("ow".into());
        let err = service.create_request(&raw, None).unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
        assert!(service.list_requests(&RequestFilter::default()).unwrap().is_empty());
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_consume_link_token_attaches_other_requests() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        let mut raw = raw_intake("ana@example.com");
        raw.is_existing_patient = Some(true);
        let first = service.create_request(&raw, None).unwrap();
        let second = service.create_request(&raw_intake("ana@example.com"), None).unwrap();

        let preview = service.resolve_link_token(first.link_token.as_deref().unwrap()).unwrap();
        assert!(!preview.expired);

        let result = service
            .consume_link_token(first.link_token.as_deref().unwrap(), "user-9")
            .unwrap();
        assert_eq!(result.outcome, LinkOutcome::Linked);
        assert_eq!(
            service.get_request(second.request.id).unwrap().user_id.as_deref(),
            Some("user-9")
        );
    }

    #[test]
    fn test_short_token_is_validation_error() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        assert!(matches!(
            service.consume_link_token("abc", "user-1"),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn test_ensure_identity_links_and_backfills() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        let first = service.ensure_patient_identity(&ContactCandidate::with_email("Ana@Example.com")).unwrap();
        assert_eq!(first.patient.full_name, "Ana");

        let mut new = NewAppointment::new("doc-1".into(), Utc::now() + Duration::days(2));
        new.patient_id = Some(first.patient.id);
        new.status = AppointmentStatus::Confirmed;
        insert_appointment(db.conn(), &new, Utc::now()).unwrap();

        let again = service.ensure_patient_identity(&ContactCandidate::with_email("ana@example.com")).unwrap();
        assert_eq!(again.patient.id, first.patient.id);
        assert_eq!(again.backfilled.len(), 1);
        assert_eq!(again.backfilled[0].status, RequestStatus::Confirmed);

        assert!(matches!(
            service.ensure_patient_identity(&ContactCandidate::default()),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn test_status_update_and_confirm_notify() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        let created = service.create_request(&raw_intake("ana@example.com"), None).unwrap();
        outbox.drain();

        service
            .update_request_status(created.request.id, RequestStatus::Reschedule, Some("Next week"))
            .unwrap();
        let sent = outbox.drain();
        assert!(sent[0].body.contains("reschedule"));
        assert!(sent[0].body.contains("Next week"));

        let details = ConfirmDetails {
            doctor_id: "doc-7".into(),
            scheduled_for: Utc::now() + Duration::days(1),
            admin_note: None,
            acting_user_id: Some("staff-1".into()),
        };
        let confirmation = service.confirm_request(created.request.id, &details).unwrap();
        assert_eq!(confirmation.request.status, RequestStatus::Confirmed);

        let sent = outbox.drain();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("doc-7"));
    }

    #[test]
    fn test_failed_delivery_keeps_the_request() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let service = IntakeService::new(&db, &config, &DownNotifier);

        let created = service.create_request(&raw_intake("ana@example.com"), None).unwrap();
        assert!(service.get_request(created.request.id).is_ok());
    }

    #[test]
    fn test_test_recipient_redirect() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig {
            test_recipient: Some("qa@clinic.example".into()),
            ..Default::default()
        };
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        service.create_request(&raw_intake("ana@example.com"), None).unwrap();
        let sent = outbox.drain();
        assert_eq!(sent[0].recipient, "qa@clinic.example");
        assert!(sent[0].subject.starts_with("[FOR Patient Ana Ruiz <ana@example.com>]"));
    }

    #[test]
    fn test_search_patients_paging() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let outbox = Outbox::new();
        let service = IntakeService::new(&db, &config, &outbox);

        service.create_request(&raw_intake("ana@example.com"), None).unwrap();
        let rows = service.search_patients(Some("ana"), None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(matches!(
            service.search_patients(None, Some(500), None),
            Err(LifecycleError::Validation(_))
        ));
    }
}
