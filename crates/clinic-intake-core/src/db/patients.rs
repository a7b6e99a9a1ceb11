//! Patient database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Gender, Patient, PatientProfile, PatientSummary};

const PATIENT_COLUMNS: &str = "id, public_id, full_name, phone, email, document_id, birth_date, \
     gender, age, preferred_channel, metadata, created_at, updated_at";

/// Insert a new patient from resolved profile values.
pub fn insert_patient(conn: &Connection, profile: &PatientProfile, now: DateTime<Utc>) -> DbResult<Patient> {
    let public_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        r#"
        INSERT INTO patients (
            public_id, full_name, phone, email, document_id, birth_date,
            gender, age, metadata, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '{}', ?9, ?9)
        "#,
        params![
            public_id,
            profile.full_name,
            profile.phone,
            profile.email,
            profile.document_id,
            profile.birth_date,
            profile.gender.map(|g| g.as_str()),
            profile.age,
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_patient(conn, id)?.ok_or_else(|| DbError::NotFound(format!("patient {}", id)))
}

/// Overwrite the profile columns of an existing patient.
pub fn update_patient_profile(
    conn: &Connection,
    id: i64,
    profile: &PatientProfile,
    now: DateTime<Utc>,
) -> DbResult<Patient> {
    let rows_affected = conn.execute(
        r#"
        UPDATE patients SET
            full_name = ?2,
            phone = ?3,
            email = ?4,
            document_id = ?5,
            birth_date = ?6,
            gender = ?7,
            age = ?8,
            updated_at = ?9
        WHERE id = ?1
        "#,
        params![
            id,
            profile.full_name,
            profile.phone,
            profile.email,
            profile.document_id,
            profile.birth_date,
            profile.gender.map(|g| g.as_str()),
            profile.age,
            now,
        ],
    )?;

    if rows_affected == 0 {
        return Err(DbError::NotFound(format!("patient {}", id)));
    }
    get_patient(conn, id)?.ok_or_else(|| DbError::NotFound(format!("patient {}", id)))
}

pub fn get_patient(conn: &Connection, id: i64) -> DbResult<Option<Patient>> {
    query_one(conn, "id = ?1", id)
}

pub fn get_patient_by_public_id(conn: &Connection, public_id: &str) -> DbResult<Option<Patient>> {
    query_one(conn, "public_id = ?1", public_id)
}

pub fn find_by_document_id(conn: &Connection, document_id: &str) -> DbResult<Option<Patient>> {
    query_one(conn, "document_id = ?1", document_id)
}

/// Case-insensitive email match.
pub fn find_by_email(conn: &Connection, email: &str) -> DbResult<Option<Patient>> {
    query_one(conn, "lower(email) = lower(?1)", email)
}

fn query_one<P: rusqlite::ToSql>(conn: &Connection, predicate: &str, value: P) -> DbResult<Option<Patient>> {
    let sql = format!("SELECT {} FROM patients WHERE {}", PATIENT_COLUMNS, predicate);
    conn.query_row(&sql, [value], read_row)
        .optional()?
        .map(|row| row.try_into())
        .transpose()
}

/// Patient directory: substring search over name, email and document id,
/// most recently updated first, with appointment count and last appointment time.
pub fn search_patients(
    conn: &Connection,
    query: Option<&str>,
    limit: u32,
    offset: u32,
) -> DbResult<Vec<PatientSummary>> {
    let pattern = query
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q.to_lowercase()));

    let mut stmt = conn.prepare(
        r#"
        SELECT p.id, p.public_id, p.full_name, p.phone, p.email, p.document_id,
               p.birth_date, p.gender, p.age, p.preferred_channel, p.metadata,
               p.created_at, p.updated_at,
               COUNT(a.id), MAX(a.scheduled_for)
        FROM patients p
        LEFT JOIN appointments a ON a.patient_id = p.id
        WHERE ?1 IS NULL
           OR lower(p.full_name) LIKE ?1
           OR lower(COALESCE(p.email, '')) LIKE ?1
           OR lower(COALESCE(p.document_id, '')) LIKE ?1
        GROUP BY p.id
        ORDER BY p.updated_at DESC, p.id DESC
        LIMIT ?2 OFFSET ?3
        "#,
    )?;

    let rows = stmt.query_map(params![pattern, limit, offset], |row| {
        let patient = read_row(row)?;
        let count: i64 = row.get(13)?;
        let last: Option<DateTime<Utc>> = row.get(14)?;
        Ok((patient, count, last))
    })?;

    let mut summaries = Vec::new();
    for row in rows {
        let (patient, count, last) = row?;
        summaries.push(PatientSummary {
            patient: patient.try_into()?,
            appointments_count: u32::try_from(count).unwrap_or(u32::MAX),
            last_appointment_at: last,
        });
    }
    Ok(summaries)
}

impl Database {
    pub fn get_patient(&self, id: i64) -> DbResult<Option<Patient>> {
        get_patient(&self.conn, id)
    }

    pub fn get_patient_by_public_id(&self, public_id: &str) -> DbResult<Option<Patient>> {
        get_patient_by_public_id(&self.conn, public_id)
    }

    pub fn search_patients(&self, query: Option<&str>, limit: u32, offset: u32) -> DbResult<Vec<PatientSummary>> {
        search_patients(&self.conn, query, limit, offset)
    }
}

/// Intermediate row struct for database mapping.
struct PatientRow {
    id: i64,
    public_id: String,
    full_name: String,
    phone: Option<String>,
    email: Option<String>,
    document_id: Option<String>,
    birth_date: Option<NaiveDate>,
    gender: Option<String>,
    age: Option<i64>,
    preferred_channel: Option<String>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        public_id: row.get(1)?,
        full_name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        document_id: row.get(5)?,
        birth_date: row.get(6)?,
        gender: row.get(7)?,
        age: row.get(8)?,
        preferred_channel: row.get(9)?,
        metadata: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TryFrom<PatientRow> for Patient {
    type Error = DbError;

    fn try_from(row: PatientRow) -> Result<Self, Self::Error> {
        let gender = row
            .gender
            .as_deref()
            .map(|g| Gender::parse(g).ok_or_else(|| DbError::Constraint(format!("Unknown gender: {}", g))))
            .transpose()?;

        Ok(Patient {
            id: row.id,
            public_id: row.public_id,
            full_name: row.full_name,
            phone: row.phone,
            email: row.email,
            document_id: row.document_id,
            birth_date: row.birth_date,
            gender,
            age: row.age.and_then(|a| u32::try_from(a).ok()),
            preferred_channel: row.preferred_channel,
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn profile(name: &str, email: Option<&str>, document_id: Option<&str>) -> PatientProfile {
        PatientProfile {
            full_name: name.into(),
            email: email.map(Into::into),
            document_id: document_id.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let mut p = profile("Ana Ruiz", Some("ana@example.com"), Some("D-10001"));
        p.birth_date = NaiveDate::from_ymd_opt(1990, 5, 17);
        p.gender = Some(Gender::Female);
        p.age = Some(34);

        let inserted = insert_patient(db.conn(), &p, Utc::now()).unwrap();
        assert_eq!(inserted.public_id.len(), 36);
        assert_eq!(inserted.metadata, serde_json::json!({}));

        let retrieved = db.get_patient(inserted.id).unwrap().unwrap();
        assert_eq!(retrieved.full_name, "Ana Ruiz");
        assert_eq!(retrieved.birth_date, NaiveDate::from_ymd_opt(1990, 5, 17));
        assert_eq!(retrieved.gender, Some(Gender::Female));
        assert_eq!(retrieved.age, Some(34));

        let by_public = db.get_patient_by_public_id(&inserted.public_id).unwrap().unwrap();
        assert_eq!(by_public.id, inserted.id);
    }

    #[test]
    fn test_find_by_email_case_insensitive() {
        let db = setup_db();
        let inserted = insert_patient(db.conn(), &profile("Ana", Some("Ana@Example.com"), None), Utc::now()).unwrap();

        let found = find_by_email(db.conn(), "ANA@example.COM").unwrap().unwrap();
        assert_eq!(found.id, inserted.id);
        assert!(find_by_email(db.conn(), "other@example.com").unwrap().is_none());
    }

    #[test]
    fn test_find_by_document_id() {
        let db = setup_db();
        let inserted = insert_patient(db.conn(), &profile("Ana", None, Some("D-10001")), Utc::now()).unwrap();

        assert_eq!(find_by_document_id(db.conn(), "D-10001").unwrap().unwrap().id, inserted.id);
        assert!(find_by_document_id(db.conn(), "D-99999").unwrap().is_none());
    }

    #[test]
    fn test_update_profile() {
        let db = setup_db();
        let inserted = insert_patient(db.conn(), &profile("Ana", Some("ana@example.com"), None), Utc::now()).unwrap();

        let mut p = profile("Ana Ruiz", Some("ana@example.com"), Some("D-10001"));
        p.phone = Some("555-1111".into());
        let updated = update_patient_profile(db.conn(), inserted.id, &p, Utc::now()).unwrap();

        assert_eq!(updated.full_name, "Ana Ruiz");
        assert_eq!(updated.phone.as_deref(), Some("555-1111"));
        assert_eq!(updated.public_id, inserted.public_id);
    }

    #[test]
    fn test_update_missing_patient() {
        let db = setup_db();
        let result = update_patient_profile(db.conn(), 42, &profile("Ana", None, None), Utc::now());
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_document_rejected() {
        let db = setup_db();
        insert_patient(db.conn(), &profile("Ana", None, Some("D-10001")), Utc::now()).unwrap();
        let result = insert_patient(db.conn(), &profile("Other", None, Some("D-10001")), Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_search_with_appointment_counts() {
        let db = setup_db();
        let ana = insert_patient(db.conn(), &profile("Ana Ruiz", Some("ana@example.com"), None), Utc::now()).unwrap();
        insert_patient(db.conn(), &profile("Bruno Diaz", Some("bruno@example.com"), None), Utc::now()).unwrap();

        let when = Utc::now();
        for _ in 0..2 {
            db.conn()
                .execute(
                    "INSERT INTO appointments (public_id, patient_id, doctor_id, scheduled_for, created_at, updated_at)
                     VALUES (?1, ?2, 'doc-1', ?3, ?3, ?3)",
                    params![uuid::Uuid::new_v4().to_string(), ana.id, when],
                )
                .unwrap();
        }

        let all = db.search_patients(None, 25, 0).unwrap();
        assert_eq!(all.len(), 2);

        let found = db.search_patients(Some("RUIZ"), 25, 0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].appointments_count, 2);
        assert_eq!(found[0].last_appointment_at, Some(when));

        let bruno = db.search_patients(Some("bruno@"), 25, 0).unwrap();
        assert_eq!(bruno[0].appointments_count, 0);
        assert!(bruno[0].last_appointment_at.is_none());
    }
}
