//! Patient identity resolution.
//!
//! Pipeline: Normalize candidate → Look up (document id, then email) →
//! Merge per field (candidate > history > stored) → Insert or update

mod normalizer;

pub use normalizer::*;

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{patients, requests, DbError};
use crate::models::{ContactCandidate, Gender, HistoricalContact, Patient, PatientProfile};

/// Identity errors.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Not enough contact data to identify a patient: {0}")]
    InsufficientData(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Resolves a bag of candidate attributes to exactly one patient row.
///
/// Works on a plain `Connection` so callers can run it inside their own
/// transaction.
pub struct PatientIdentityResolver<'c> {
    conn: &'c Connection,
    normalizer: ContactNormalizer,
}

/// Candidate fields after normalization; everything invalid is already `None`.
#[derive(Debug)]
struct CleanCandidate {
    full_name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    document_id: Option<String>,
    birth_date: Option<NaiveDate>,
    gender: Option<Gender>,
    age: Option<u32>,
}

impl<'c> PatientIdentityResolver<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            normalizer: ContactNormalizer::new(),
        }
    }

    /// Use a fixed reference day for age computation.
    pub fn with_normalizer(mut self, normalizer: ContactNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Find the patient matching the candidate, merge and persist.
    ///
    /// `history` is the secondary source, ranked between the candidate and
    /// the stored row. Absence of a match always results in creation.
    pub fn resolve(
        &self,
        candidate: &ContactCandidate,
        history: Option<&HistoricalContact>,
    ) -> IdentityResult<Patient> {
        let clean = self.clean(candidate);
        let existing = self.lookup(clean.document_id.as_deref(), clean.email.as_deref())?;
        let profile = self.merge(&clean, history, existing.as_ref())?;
        let profile = self.drop_conflicting_keys(profile, existing.as_ref())?;
        let now = Utc::now();

        let patient = match existing {
            Some(found) => {
                let patient = patients::update_patient_profile(self.conn, found.id, &profile, now)?;
                info!(patient_id = patient.id, public_id = %patient.public_id, "patient merged");
                patient
            }
            None => {
                let patient = patients::insert_patient(self.conn, &profile, now)?;
                info!(patient_id = patient.id, public_id = %patient.public_id, "patient created");
                patient
            }
        };
        Ok(patient)
    }

    /// Resolve for an account registration: email is mandatory and the
    /// latest request for that email is used as the secondary source.
    pub fn resolve_for_registration(&self, candidate: &ContactCandidate) -> IdentityResult<Patient> {
        let email = self
            .normalizer
            .email(candidate.email.as_deref())
            .ok_or_else(|| IdentityError::InsufficientData("a valid email is required".into()))?;

        let history = requests::latest_contact_for_email(self.conn, &email)?;
        debug!(email = %email, has_history = history.is_some(), "registration history lookup");
        self.resolve(candidate, history.as_ref())
    }

    fn clean(&self, candidate: &ContactCandidate) -> CleanCandidate {
        let n = &self.normalizer;

        if candidate.gender.as_deref().map(str::trim).is_some_and(|g| !g.is_empty())
            && n.gender(candidate.gender.as_deref()).is_none()
        {
            warn!(gender = ?candidate.gender, "discarding gender outside allow-list");
        }
        let birth_date = n.birth_date(candidate.birth_date.as_ref());
        if candidate.birth_date.is_some() && birth_date.is_none() {
            warn!(birth_date = ?candidate.birth_date, "discarding unparseable birth date");
        }

        CleanCandidate {
            full_name: n.text(candidate.full_name.as_deref()),
            phone: n.text(candidate.phone.as_deref()),
            email: n.email(candidate.email.as_deref()),
            document_id: n.text(candidate.document_id.as_deref()),
            birth_date,
            gender: n.gender(candidate.gender.as_deref()),
            age: n.age(candidate.age),
        }
    }

    /// Document id wins; email is the fallback key.
    fn lookup(&self, document_id: Option<&str>, email: Option<&str>) -> IdentityResult<Option<Patient>> {
        if let Some(document_id) = document_id {
            if let Some(found) = patients::find_by_document_id(self.conn, document_id)? {
                debug!(patient_id = found.id, "matched patient by document id");
                return Ok(Some(found));
            }
        }
        if let Some(email) = email {
            if let Some(found) = patients::find_by_email(self.conn, email)? {
                debug!(patient_id = found.id, "matched patient by email");
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn merge(
        &self,
        clean: &CleanCandidate,
        history: Option<&HistoricalContact>,
        existing: Option<&Patient>,
    ) -> IdentityResult<PatientProfile> {
        let n = &self.normalizer;
        let hist_text = |f: fn(&HistoricalContact) -> Option<&str>| n.text(history.and_then(f));
        let stored_text = |f: fn(&Patient) -> Option<&str>| n.text(existing.and_then(f));

        let email = clean
            .email
            .clone()
            .or_else(|| n.email(history.and_then(|h| h.email.as_deref())))
            .or_else(|| n.email(existing.and_then(|p| p.email.as_deref())));

        let full_name = clean
            .full_name
            .clone()
            .or_else(|| hist_text(|h| h.full_name.as_deref()))
            .or_else(|| stored_text(|p| Some(p.full_name.as_str())))
            .or_else(|| email.as_deref().and_then(email_local_part).map(str::to_string))
            .or_else(|| email.clone())
            .ok_or_else(|| IdentityError::InsufficientData("neither a name nor an email was supplied".into()))?;

        let birth_date = clean
            .birth_date
            .or_else(|| history.and_then(|h| h.birth_date))
            .or_else(|| existing.and_then(|p| p.birth_date));

        let age = clean
            .age
            .or_else(|| history.and_then(|h| h.age).filter(|a| *a <= MAX_AGE))
            .or_else(|| birth_date.and_then(|b| n.age_from_birth(b)))
            .or_else(|| existing.and_then(|p| p.age));

        Ok(PatientProfile {
            full_name,
            phone: clean
                .phone
                .clone()
                .or_else(|| hist_text(|h| h.phone.as_deref()))
                .or_else(|| stored_text(|p| p.phone.as_deref())),
            email,
            document_id: clean
                .document_id
                .clone()
                .or_else(|| hist_text(|h| h.document_id.as_deref()))
                .or_else(|| stored_text(|p| p.document_id.as_deref())),
            birth_date,
            gender: clean
                .gender
                .or_else(|| history.and_then(|h| h.gender))
                .or_else(|| existing.and_then(|p| p.gender)),
            age,
        })
    }

    /// A merged key that already belongs to a different patient is not
    /// moved; the row keeps its own value (or none, for a new row).
    fn drop_conflicting_keys(
        &self,
        mut profile: PatientProfile,
        existing: Option<&Patient>,
    ) -> IdentityResult<PatientProfile> {
        let own_id = existing.map(|p| p.id);

        if let Some(document_id) = profile.document_id.as_deref() {
            if let Some(owner) = patients::find_by_document_id(self.conn, document_id)? {
                if Some(owner.id) != own_id {
                    warn!(
                        owner_id = owner.id,
                        patient_id = ?own_id,
                        "document id belongs to another patient, keeping stored value"
                    );
                    profile.document_id = existing.and_then(|p| p.document_id.clone());
                }
            }
        }

        if let Some(email) = profile.email.as_deref() {
            if let Some(owner) = patients::find_by_email(self.conn, email)? {
                if Some(owner.id) != own_id {
                    warn!(
                        owner_id = owner.id,
                        patient_id = ?own_id,
                        "email belongs to another patient, keeping stored value"
                    );
                    profile.email = existing.and_then(|p| p.email.clone());
                }
            }
        }

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{DateInput, IntakeSubmission};

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn candidate(document_id: Option<&str>, email: Option<&str>) -> ContactCandidate {
        ContactCandidate {
            full_name: Some("Ana Ruiz".into()),
            document_id: document_id.map(Into::into),
            email: email.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn test_creates_when_absent() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());

        let patient = resolver.resolve(&candidate(Some("D-10001"), Some("ana@example.com")), None).unwrap();
        assert_eq!(patient.full_name, "Ana Ruiz");
        assert_eq!(patient.document_id.as_deref(), Some("D-10001"));
    }

    #[test]
    fn test_reuses_row_by_document_or_email() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());
        let first = resolver.resolve(&candidate(Some("D-10001"), Some("ana@example.com")), None).unwrap();

        let by_doc = resolver.resolve(&candidate(Some("D-10001"), None), None).unwrap();
        let by_email = resolver.resolve(&candidate(None, Some("ANA@EXAMPLE.COM")), None).unwrap();
        assert_eq!(by_doc.id, first.id);
        assert_eq!(by_email.id, first.id);

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_blank_never_overwrites_known_value() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());
        let mut c = candidate(Some("D-10001"), None);
        c.phone = Some("555-1111".into());
        resolver.resolve(&c, None).unwrap();

        c.phone = Some("   ".into());
        c.full_name = None;
        let patient = resolver.resolve(&c, None).unwrap();
        assert_eq!(patient.phone.as_deref(), Some("555-1111"));
        assert_eq!(patient.full_name, "Ana Ruiz");
    }

    #[test]
    fn test_history_ranks_between_candidate_and_stored() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());
        let mut stored = candidate(None, Some("ana@example.com"));
        stored.phone = Some("555-0000".into());
        stored.gender = Some("female".into());
        resolver.resolve(&stored, None).unwrap();

        let history = HistoricalContact {
            phone: Some("555-1111".into()),
            document_id: Some("D-10001".into()),
            ..Default::default()
        };
        let mut c = ContactCandidate::with_email("ana@example.com");
        c.document_id = Some("D-20002".into());

        let patient = resolver.resolve(&c, Some(&history)).unwrap();
        assert_eq!(patient.phone.as_deref(), Some("555-1111"));
        assert_eq!(patient.document_id.as_deref(), Some("D-20002"));
        assert_eq!(patient.gender, Some(Gender::Female));
    }

    #[test]
    fn test_invalid_fields_treated_as_absent() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());
        let mut c = candidate(Some("D-10001"), None);
        c.gender = Some("male".into());
        c.birth_date = Some(DateInput::from("1990-05-17"));
        resolver.resolve(&c, None).unwrap();

        c.gender = Some("unknown".into());
        c.birth_date = Some(DateInput::from("yesterday-ish"));
        let patient = resolver.resolve(&c, None).unwrap();
        assert_eq!(patient.gender, Some(Gender::Male));
        assert_eq!(patient.birth_date, NaiveDate::from_ymd_opt(1990, 5, 17));
    }

    #[test]
    fn test_age_precedence() {
        let db = setup_db();
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let resolver = PatientIdentityResolver::new(db.conn()).with_normalizer(ContactNormalizer::as_of(today));

        let mut c = candidate(Some("D-10001"), None);
        c.birth_date = Some(DateInput::from("2000-10-20"));
        assert_eq!(resolver.resolve(&c, None).unwrap().age, Some(25));

        c.age = Some(30);
        assert_eq!(resolver.resolve(&c, None).unwrap().age, Some(30));

        c.age = Some(-4);
        assert_eq!(resolver.resolve(&c, None).unwrap().age, Some(25));
    }

    #[test]
    fn test_name_falls_back_to_email_local_part() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());

        let patient = resolver.resolve(&ContactCandidate::with_email("ana.ruiz@example.com"), None).unwrap();
        assert_eq!(patient.full_name, "ana.ruiz");
    }

    #[test]
    fn test_nothing_to_identify() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());
        let result = resolver.resolve(&ContactCandidate::default(), None);
        assert!(matches!(result, Err(IdentityError::InsufficientData(_))));
    }

    #[test]
    fn test_conflicting_email_not_moved() {
        let db = setup_db();
        let resolver = PatientIdentityResolver::new(db.conn());
        let bruno = resolver.resolve(&candidate(Some("D-20002"), Some("bruno@example.com")), None).unwrap();
        let ana = resolver.resolve(&candidate(Some("D-10001"), Some("ana@example.com")), None).unwrap();

        // Document matches Ana, email belongs to Bruno
        let merged = resolver.resolve(&candidate(Some("D-10001"), Some("bruno@example.com")), None).unwrap();
        assert_eq!(merged.id, ana.id);
        assert_eq!(merged.email.as_deref(), Some("ana@example.com"));
        assert_eq!(db.get_patient(bruno.id).unwrap().unwrap().email.as_deref(), Some("bruno@example.com"));
    }

    #[test]
    fn test_registration_uses_latest_request() {
        let db = setup_db();
        let submission = IntakeSubmission {
            full_name: "Ana Ruiz".into(),
            email: "ana@example.com".into(),
            phone: Some("555-1111".into()),
            age: Some(36),
            ..Default::default()
        };
        requests::insert_request(db.conn(), &submission, None, Utc::now()).unwrap();

        let resolver = PatientIdentityResolver::new(db.conn());
        let patient = resolver
            .resolve_for_registration(&ContactCandidate::with_email("ana@example.com"))
            .unwrap();
        assert_eq!(patient.full_name, "Ana Ruiz");
        assert_eq!(patient.phone.as_deref(), Some("555-1111"));
        assert_eq!(patient.age, Some(36));

        let missing = resolver.resolve_for_registration(&ContactCandidate::default());
        assert!(matches!(missing, Err(IdentityError::InsufficientData(_))));
    }
}
