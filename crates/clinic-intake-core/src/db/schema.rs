//! SQLite schema definition.

/// Complete database schema for the intake engine.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients (durable identity anchor)
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    document_id TEXT UNIQUE,
    birth_date TEXT,                             -- YYYY-MM-DD
    gender TEXT CHECK (gender IS NULL OR gender IN ('male', 'female')),
    age INTEGER CHECK (age IS NULL OR age >= 0),
    preferred_channel TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',         -- JSON object
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One patient per case-insensitive email
CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_email
    ON patients(lower(email)) WHERE email IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(full_name);

-- ============================================================================
-- Appointments
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id TEXT NOT NULL UNIQUE,
    patient_id INTEGER REFERENCES patients(id),
    doctor_id TEXT NOT NULL,
    scheduled_for TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL DEFAULT 30 CHECK (duration_minutes > 0),
    reason TEXT,
    additional_notes TEXT,
    channel TEXT NOT NULL DEFAULT 'public'
        CHECK (channel IN ('public', 'portal', 'admin')),
    priority TEXT NOT NULL DEFAULT 'routine'
        CHECK (priority IN ('routine', 'priority', 'emergency')),
    status TEXT NOT NULL DEFAULT 'confirmed'
        CHECK (status IN ('pending', 'confirmed', 'cancelled', 'completed')),
    created_by_user TEXT,
    intake_payload TEXT NOT NULL DEFAULT '{}',   -- JSON object
    legacy_name TEXT,
    legacy_phone TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id);
CREATE INDEX IF NOT EXISTS idx_appointments_scheduled ON appointments(scheduled_for);

-- ============================================================================
-- Appointment Requests (intake ledger)
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointment_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT,
    document_id TEXT,
    birth_date TEXT,
    gender TEXT CHECK (gender IS NULL OR gender IN ('male', 'female')),
    age INTEGER CHECK (age IS NULL OR age >= 0),
    symptoms TEXT,
    preferred_date TEXT,
    preferred_time_range TEXT,
    is_existing_patient INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'confirmed', 'rejected', 'reschedule')),
    admin_note TEXT,
    link_token TEXT UNIQUE,
    token_expires_at TEXT,
    consumed_token_hash TEXT,                    -- SHA-256 of the token once used
    user_id TEXT,
    patient_id INTEGER REFERENCES patients(id),
    appointment_id INTEGER UNIQUE REFERENCES appointments(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (link_token IS NULL OR token_expires_at IS NOT NULL),
    CHECK (status <> 'confirmed' OR (patient_id IS NOT NULL AND appointment_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_requests_email ON appointment_requests(lower(email));
CREATE INDEX IF NOT EXISTS idx_requests_status ON appointment_requests(status);
CREATE INDEX IF NOT EXISTS idx_requests_patient ON appointment_requests(patient_id);
CREATE INDEX IF NOT EXISTS idx_requests_user ON appointment_requests(user_id);
CREATE INDEX IF NOT EXISTS idx_requests_consumed_token
    ON appointment_requests(consumed_token_hash);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    fn insert_patient(conn: &Connection, public_id: &str, email: Option<&str>) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO patients (public_id, full_name, email, created_at, updated_at)
             VALUES (?1, 'Ana', ?2, datetime('now'), datetime('now'))",
            rusqlite::params![public_id, email],
        )
    }

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = setup_conn();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_email_unique_case_insensitive() {
        let conn = setup_conn();
        insert_patient(&conn, "p-1", Some("Ana@Example.com")).unwrap();

        let result = insert_patient(&conn, "p-2", Some("ana@example.com"));
        assert!(result.is_err());

        // NULL emails don't collide
        insert_patient(&conn, "p-3", None).unwrap();
        insert_patient(&conn, "p-4", None).unwrap();
    }

    #[test]
    fn test_gender_check_constraint() {
        let conn = setup_conn();
        let result = conn.execute(
            "INSERT INTO patients (public_id, full_name, gender, created_at, updated_at)
             VALUES ('p-1', 'Ana', 'unknown', datetime('now'), datetime('now'))",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_token_requires_expiry() {
        let conn = setup_conn();
        let result = conn.execute(
            "INSERT INTO appointment_requests
                (public_id, full_name, email, link_token, created_at, updated_at)
             VALUES ('r-1', 'Ana', 'ana@example.com', 'tok', datetime('now'), datetime('now'))",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_confirmed_requires_patient_and_appointment() {
        let conn = setup_conn();
        let result = conn.execute(
            "INSERT INTO appointment_requests
                (public_id, full_name, email, status, created_at, updated_at)
             VALUES ('r-1', 'Ana', 'ana@example.com', 'confirmed', datetime('now'), datetime('now'))",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_one_request_per_appointment() {
        let conn = setup_conn();
        conn.execute(
            "INSERT INTO appointments (public_id, doctor_id, scheduled_for, created_at, updated_at)
             VALUES ('a-1', 'doc-1', datetime('now'), datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();
        let appointment_id = conn.last_insert_rowid();

        let insert = |public_id: &str| {
            conn.execute(
                "INSERT INTO appointment_requests
                    (public_id, full_name, email, appointment_id, created_at, updated_at)
                 VALUES (?1, 'Ana', 'ana@example.com', ?2, datetime('now'), datetime('now'))",
                rusqlite::params![public_id, appointment_id],
            )
        };
        insert("r-1").unwrap();
        assert!(insert("r-2").is_err());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let conn = setup_conn();
        let result = conn.execute(
            "INSERT INTO appointment_requests
                (public_id, full_name, email, status, created_at, updated_at)
             VALUES ('r-1', 'Ana', 'ana@example.com', 'archived', datetime('now'), datetime('now'))",
            [],
        );
        assert!(result.is_err());
    }
}
