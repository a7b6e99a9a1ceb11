//! Appointment-request database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{
    AppointmentRequest, Gender, HistoricalContact, IdentityKey, IntakeSubmission, RequestStatus,
};

const REQUEST_COLUMNS: &str = "id, public_id, full_name, email, phone, document_id, birth_date, \
     gender, age, symptoms, preferred_date, preferred_time_range, is_existing_patient, status, \
     admin_note, link_token, token_expires_at, user_id, patient_id, appointment_id, \
     created_at, updated_at";

/// A freshly issued link token and its absolute expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Insert a `pending` request.
pub fn insert_request(
    conn: &Connection,
    submission: &IntakeSubmission,
    token: Option<&IssuedToken>,
    now: DateTime<Utc>,
) -> DbResult<AppointmentRequest> {
    let public_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        r#"
        INSERT INTO appointment_requests (
            public_id, full_name, email, phone, document_id, birth_date, gender, age,
            symptoms, preferred_date, preferred_time_range, is_existing_patient,
            status, link_token, token_expires_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'pending', ?13, ?14, ?15, ?15)
        "#,
        params![
            public_id,
            submission.full_name,
            submission.email,
            submission.phone,
            submission.document_id,
            submission.birth_date,
            submission.gender.map(|g| g.as_str()),
            submission.age,
            submission.symptoms,
            submission.preferred_date,
            submission.preferred_time_range,
            submission.is_existing_patient,
            token.map(|t| t.token.as_str()),
            token.map(|t| t.expires_at),
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();
    require(conn, id)
}

pub fn get_request(conn: &Connection, id: i64) -> DbResult<Option<AppointmentRequest>> {
    query_one(conn, "id = ?1", id)
}

/// Like [`get_request`], but a missing row is an error.
pub fn require(conn: &Connection, id: i64) -> DbResult<AppointmentRequest> {
    get_request(conn, id)?.ok_or_else(|| DbError::NotFound(format!("appointment request {}", id)))
}

pub fn get_by_public_id(conn: &Connection, public_id: &str) -> DbResult<Option<AppointmentRequest>> {
    query_one(conn, "public_id = ?1", public_id)
}

/// Exact match on a live (unconsumed) token.
pub fn get_by_link_token(conn: &Connection, token: &str) -> DbResult<Option<AppointmentRequest>> {
    query_one(conn, "link_token = ?1", token)
}

/// Match on the hash recorded when a token was consumed.
pub fn get_by_consumed_token_hash(conn: &Connection, hash: &str) -> DbResult<Option<AppointmentRequest>> {
    query_one(conn, "consumed_token_hash = ?1", hash)
}

fn query_one<P: rusqlite::ToSql>(
    conn: &Connection,
    predicate: &str,
    value: P,
) -> DbResult<Option<AppointmentRequest>> {
    let sql = format!(
        "SELECT {} FROM appointment_requests WHERE {}",
        REQUEST_COLUMNS, predicate
    );
    conn.query_row(&sql, [value], read_row)
        .optional()?
        .map(|row| row.try_into())
        .transpose()
}

fn query_many(conn: &Connection, sql: &str, values: Vec<Value>) -> DbResult<Vec<AppointmentRequest>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(values), read_row)?;

    let mut requests = Vec::new();
    for row in rows {
        requests.push(row?.try_into()?);
    }
    Ok(requests)
}

/// Staff listing, newest first. `search` is a case-insensitive substring
/// over name, email, phone and document id.
pub fn list_requests(
    conn: &Connection,
    status: Option<RequestStatus>,
    search: Option<&str>,
    limit: u32,
    offset: u32,
) -> DbResult<Vec<AppointmentRequest>> {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(status) = status {
        values.push(Value::Text(status.as_str().to_string()));
        conditions.push(format!("status = ?{}", values.len()));
    }

    if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
        values.push(Value::Text(format!("%{}%", search.to_lowercase())));
        let n = values.len();
        conditions.push(format!(
            "(lower(full_name) LIKE ?{n} OR lower(email) LIKE ?{n} \
             OR lower(COALESCE(phone, '')) LIKE ?{n} OR lower(COALESCE(document_id, '')) LIKE ?{n})"
        ));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    values.push(Value::Integer(i64::from(limit)));
    values.push(Value::Integer(i64::from(offset)));
    let sql = format!(
        "SELECT {} FROM appointment_requests {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        REQUEST_COLUMNS,
        where_clause,
        values.len() - 1,
        values.len()
    );

    query_many(conn, &sql, values)
}

/// A person's own request history, newest first.
///
/// With `statuses = None`, confirmed requests are left out.
pub fn list_for_identity(
    conn: &Connection,
    key: &IdentityKey,
    statuses: Option<&[RequestStatus]>,
) -> DbResult<Vec<AppointmentRequest>> {
    let mut values = Vec::new();
    let identity = match key {
        IdentityKey::Patient(id) => {
            values.push(Value::Integer(*id));
            "patient_id = ?1"
        }
        IdentityKey::User(user_id) => {
            values.push(Value::Text(user_id.clone()));
            "user_id = ?1"
        }
        IdentityKey::Email(email) => {
            values.push(Value::Text(email.trim().to_string()));
            "lower(email) = lower(?1)"
        }
    };

    let status_clause = match statuses {
        Some([]) => return Ok(Vec::new()),
        Some(statuses) => {
            let placeholders: Vec<String> = statuses
                .iter()
                .map(|s| {
                    values.push(Value::Text(s.as_str().to_string()));
                    format!("?{}", values.len())
                })
                .collect();
            format!("status IN ({})", placeholders.join(", "))
        }
        None => "status <> 'confirmed'".to_string(),
    };

    let sql = format!(
        "SELECT {} FROM appointment_requests WHERE {} AND {} ORDER BY created_at DESC, id DESC",
        REQUEST_COLUMNS, identity, status_clause
    );
    query_many(conn, &sql, values)
}

/// Direct status write; returns false when the row does not exist.
pub fn set_status(
    conn: &Connection,
    id: i64,
    status: RequestStatus,
    admin_note: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE appointment_requests SET status = ?2, admin_note = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, status.as_str(), admin_note, now],
    )?;
    Ok(rows_affected > 0)
}

/// Final step of a confirmation. Age is only filled in when still unknown.
pub fn mark_confirmed(
    conn: &Connection,
    id: i64,
    patient_id: i64,
    appointment_id: i64,
    admin_note: Option<&str>,
    resolved_age: Option<u32>,
    now: DateTime<Utc>,
) -> DbResult<AppointmentRequest> {
    conn.execute(
        r#"
        UPDATE appointment_requests SET
            status = 'confirmed',
            admin_note = ?2,
            appointment_id = ?3,
            patient_id = ?4,
            age = COALESCE(age, ?5),
            updated_at = ?6
        WHERE id = ?1
        "#,
        params![id, admin_note, appointment_id, patient_id, resolved_age, now],
    )?;
    require(conn, id)
}

/// Consume the live token: bind the user and clear the token columns.
pub fn mark_linked(
    conn: &Connection,
    id: i64,
    user_id: &str,
    consumed_token_hash: &str,
    now: DateTime<Utc>,
) -> DbResult<AppointmentRequest> {
    conn.execute(
        r#"
        UPDATE appointment_requests SET
            user_id = ?2,
            is_existing_patient = 1,
            link_token = NULL,
            token_expires_at = NULL,
            consumed_token_hash = ?3,
            updated_at = ?4
        WHERE id = ?1
        "#,
        params![id, user_id, consumed_token_hash, now],
    )?;
    require(conn, id)
}

/// Attach an account to the still-open, unowned requests for an email.
/// Returns the number of requests touched; a repeat call touches none.
pub fn assign_user(conn: &Connection, email: &str, user_id: &str, now: DateTime<Utc>) -> DbResult<usize> {
    let rows_affected = conn.execute(
        r#"
        UPDATE appointment_requests SET
            user_id = ?2,
            is_existing_patient = 1,
            updated_at = ?3
        WHERE lower(email) = lower(?1)
          AND user_id IS NULL
          AND status IN ('pending', 'reschedule')
        "#,
        params![email.trim(), user_id, now],
    )?;
    Ok(rows_affected)
}

/// Point every request for an email that has no patient at `patient_id`.
pub fn link_patient_by_email(conn: &Connection, email: &str, patient_id: i64, now: DateTime<Utc>) -> DbResult<usize> {
    let rows_affected = conn.execute(
        r#"
        UPDATE appointment_requests SET patient_id = ?2, updated_at = ?3
        WHERE lower(email) = lower(?1) AND patient_id IS NULL
        "#,
        params![email.trim(), patient_id, now],
    )?;
    Ok(rows_affected)
}

/// Contact values from the most recent request for an email.
pub fn latest_contact_for_email(conn: &Connection, email: &str) -> DbResult<Option<HistoricalContact>> {
    let row = conn
        .query_row(
            r#"
            SELECT full_name, phone, email, document_id, birth_date, gender, age
            FROM appointment_requests
            WHERE lower(email) = lower(?1)
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            [email.trim()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<NaiveDate>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(full_name, phone, email, document_id, birth_date, gender, age)| HistoricalContact {
        full_name: Some(full_name),
        phone,
        email: Some(email),
        document_id,
        birth_date,
        gender: gender.as_deref().and_then(Gender::parse),
        age: age.and_then(|a| u32::try_from(a).ok()),
    }))
}

/// Values of a request synthesized for an appointment created outside intake.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillRequest {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
    pub symptoms: Option<String>,
    pub preferred_date: DateTime<Utc>,
    pub status: RequestStatus,
    pub admin_note: String,
    pub patient_id: i64,
    pub appointment_id: i64,
}

/// Insert a backfilled request stamped with the appointment's own creation
/// time; `None` when the appointment already has a request.
pub fn insert_backfill(
    conn: &Connection,
    backfill: &BackfillRequest,
    created_at: DateTime<Utc>,
) -> DbResult<Option<AppointmentRequest>> {
    let public_id = uuid::Uuid::new_v4().to_string();
    let inserted = conn.execute(
        r#"
        INSERT INTO appointment_requests (
            public_id, full_name, email, phone, document_id, birth_date, gender, age,
            symptoms, preferred_date, is_existing_patient, status, admin_note,
            patient_id, appointment_id, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12, ?13, ?14, ?15, ?15)
        ON CONFLICT(appointment_id) DO NOTHING
        "#,
        params![
            public_id,
            backfill.full_name,
            backfill.email,
            backfill.phone,
            backfill.document_id,
            backfill.birth_date,
            backfill.gender.map(|g| g.as_str()),
            backfill.age,
            backfill.symptoms,
            backfill.preferred_date,
            backfill.status.as_str(),
            backfill.admin_note,
            backfill.patient_id,
            backfill.appointment_id,
            created_at,
        ],
    )?;

    if inserted == 0 {
        return Ok(None);
    }
    require(conn, conn.last_insert_rowid()).map(Some)
}

impl Database {
    pub fn get_request(&self, id: i64) -> DbResult<Option<AppointmentRequest>> {
        get_request(&self.conn, id)
    }

    pub fn get_request_by_public_id(&self, public_id: &str) -> DbResult<Option<AppointmentRequest>> {
        get_by_public_id(&self.conn, public_id)
    }
}

/// Intermediate row struct for database mapping.
struct RequestRow {
    id: i64,
    public_id: String,
    full_name: String,
    email: String,
    phone: Option<String>,
    document_id: Option<String>,
    birth_date: Option<NaiveDate>,
    gender: Option<String>,
    age: Option<i64>,
    symptoms: Option<String>,
    preferred_date: Option<DateTime<Utc>>,
    preferred_time_range: Option<String>,
    is_existing_patient: bool,
    status: String,
    admin_note: Option<String>,
    link_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    user_id: Option<String>,
    patient_id: Option<i64>,
    appointment_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        id: row.get(0)?,
        public_id: row.get(1)?,
        full_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        document_id: row.get(5)?,
        birth_date: row.get(6)?,
        gender: row.get(7)?,
        age: row.get(8)?,
        symptoms: row.get(9)?,
        preferred_date: row.get(10)?,
        preferred_time_range: row.get(11)?,
        is_existing_patient: row.get(12)?,
        status: row.get(13)?,
        admin_note: row.get(14)?,
        link_token: row.get(15)?,
        token_expires_at: row.get(16)?,
        user_id: row.get(17)?,
        patient_id: row.get(18)?,
        appointment_id: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

impl TryFrom<RequestRow> for AppointmentRequest {
    type Error = DbError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = RequestStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown request status: {}", row.status)))?;
        let gender = row
            .gender
            .as_deref()
            .map(|g| Gender::parse(g).ok_or_else(|| DbError::Constraint(format!("Unknown gender: {}", g))))
            .transpose()?;

        Ok(AppointmentRequest {
            id: row.id,
            public_id: row.public_id,
            full_name: row.full_name,
            email: row.email,
            phone: row.phone,
            document_id: row.document_id,
            birth_date: row.birth_date,
            gender,
            age: row.age.and_then(|a| u32::try_from(a).ok()),
            symptoms: row.symptoms,
            preferred_date: row.preferred_date,
            preferred_time_range: row.preferred_time_range,
            is_existing_patient: row.is_existing_patient,
            status,
            admin_note: row.admin_note,
            link_token: row.link_token,
            token_expires_at: row.token_expires_at,
            user_id: row.user_id,
            patient_id: row.patient_id,
            appointment_id: row.appointment_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
