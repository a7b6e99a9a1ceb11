//! Request persistence and staff status transitions.

use chrono::Utc;
use tracing::{info, warn};

use super::{LifecycleError, LifecycleResult, LinkTokenManager};
use crate::config::EngineConfig;
use crate::db::{requests, Database};
use crate::identity::calculate_age;
use crate::models::{AppointmentRequest, IdentityKey, IntakeSubmission, RequestFilter, RequestStatus};

/// CRUD and status transitions for appointment requests.
pub struct RequestStore<'a> {
    db: &'a Database,
    tokens: LinkTokenManager<'a>,
    default_page_size: u32,
    max_page_size: u32,
}

impl<'a> RequestStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_config(db, &EngineConfig::default())
    }

    pub fn with_config(db: &'a Database, config: &EngineConfig) -> Self {
        Self {
            db,
            tokens: LinkTokenManager::with_config(db, config),
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    /// Insert a `pending` request. A submitter claiming to be an existing
    /// patient also gets a link token, returned alongside. A missing age is
    /// derived from the birth date.
    pub fn create(&self, submission: &IntakeSubmission) -> LifecycleResult<(AppointmentRequest, Option<String>)> {
        let now = Utc::now();
        let token = submission.is_existing_patient.then(|| self.tokens.issue(now));
        let submission = IntakeSubmission {
            age: submission.age.or_else(|| submission.birth_date.and_then(calculate_age)),
            ..submission.clone()
        };

        let request = requests::insert_request(self.db.conn(), &submission, token.as_ref(), now)?;
        info!(
            request_id = request.id,
            public_id = %request.public_id,
            with_token = token.is_some(),
            "appointment request created"
        );
        Ok((request, token.map(|t| t.token)))
    }

    pub fn get(&self, id: i64) -> LifecycleResult<AppointmentRequest> {
        requests::get_request(self.db.conn(), id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("appointment request {}", id)))
    }

    pub fn get_by_public_id(&self, public_id: &str) -> LifecycleResult<AppointmentRequest> {
        requests::get_by_public_id(self.db.conn(), public_id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("appointment request {}", public_id)))
    }

    /// Staff listing with optional status and free-text filters.
    pub fn list(&self, filter: &RequestFilter) -> LifecycleResult<Vec<AppointmentRequest>> {
        let limit = filter.limit.unwrap_or(self.default_page_size);
        if limit == 0 || limit > self.max_page_size {
            return Err(LifecycleError::Validation(format!(
                "limit must be between 1 and {}",
                self.max_page_size
            )));
        }

        Ok(requests::list_requests(
            self.db.conn(),
            filter.status,
            filter.search.as_deref(),
            limit,
            filter.offset.unwrap_or(0),
        )?)
    }

    /// A person's own history; confirmed requests are excluded unless
    /// `statuses` asks for them.
    pub fn list_for_identity(
        &self,
        key: &IdentityKey,
        statuses: Option<&[RequestStatus]>,
    ) -> LifecycleResult<Vec<AppointmentRequest>> {
        Ok(requests::list_for_identity(self.db.conn(), key, statuses)?)
    }

    /// Staff status write. `rejected` and `reschedule` need a note;
    /// `confirmed` is only reachable through confirmation, and a confirmed
    /// request never moves again.
    pub fn update_status(
        &self,
        id: i64,
        status: RequestStatus,
        admin_note: Option<&str>,
    ) -> LifecycleResult<AppointmentRequest> {
        if status == RequestStatus::Confirmed {
            return Err(LifecycleError::InvalidState(
                "requests are confirmed through the confirmation flow".into(),
            ));
        }

        let note = admin_note.map(str::trim).filter(|n| !n.is_empty());
        if status.requires_admin_note() && note.is_none() {
            return Err(LifecycleError::Validation(format!(
                "an admin note is required for status {}",
                status.as_str()
            )));
        }

        self.db.with_immediate_transaction(|tx| {
            let current = requests::get_request(tx, id)?
                .ok_or_else(|| LifecycleError::NotFound(format!("appointment request {}", id)))?;

            if current.is_confirmed() {
                warn!(request_id = id, "status change refused on confirmed request");
                return Err(LifecycleError::InvalidState(format!(
                    "appointment request {} is already confirmed",
                    id
                )));
            }

            requests::set_status(tx, id, status, note, Utc::now())?;
            info!(
                request_id = id,
                from = current.status.as_str(),
                to = status.as_str(),
                "request status updated"
            );
            Ok(requests::require(tx, id)?)
        })
    }

    /// Attach an account to the open, unowned requests sharing an email.
    pub fn assign_user(&self, email: &str, user_id: &str) -> LifecycleResult<usize> {
        let assigned = requests::assign_user(self.db.conn(), email, user_id, Utc::now())?;
        if assigned > 0 {
            info!(user_id = %user_id, assigned, "requests assigned to account");
        }
        Ok(assigned)
    }
}
