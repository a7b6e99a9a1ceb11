//! Appointment database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{
    Appointment, AppointmentChannel, AppointmentPriority, AppointmentStatus, NewAppointment,
};

const APPOINTMENT_COLUMNS: &str = "id, public_id, patient_id, doctor_id, scheduled_for, \
     duration_minutes, reason, additional_notes, channel, priority, status, created_by_user, \
     intake_payload, legacy_name, legacy_phone, created_at, updated_at";

/// Insert a new appointment.
pub fn insert_appointment(conn: &Connection, appt: &NewAppointment, now: DateTime<Utc>) -> DbResult<Appointment> {
    let public_id = uuid::Uuid::new_v4().to_string();
    let payload = serde_json::to_string(&appt.intake_payload)?;

    conn.execute(
        r#"
        INSERT INTO appointments (
            public_id, patient_id, doctor_id, scheduled_for, duration_minutes,
            reason, additional_notes, channel, priority, status, created_by_user,
            intake_payload, legacy_name, legacy_phone, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
        "#,
        params![
            public_id,
            appt.patient_id,
            appt.doctor_id,
            appt.scheduled_for,
            appt.duration_minutes,
            appt.reason,
            appt.additional_notes,
            appt.channel.as_str(),
            appt.priority.as_str(),
            appt.status.as_str(),
            appt.created_by_user,
            payload,
            appt.legacy_name,
            appt.legacy_phone,
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_appointment(conn, id)?.ok_or_else(|| DbError::NotFound(format!("appointment {}", id)))
}

pub fn get_appointment(conn: &Connection, id: i64) -> DbResult<Option<Appointment>> {
    let sql = format!("SELECT {} FROM appointments WHERE id = ?1", APPOINTMENT_COLUMNS);
    conn.query_row(&sql, [id], read_row)
        .optional()?
        .map(|row| row.try_into())
        .transpose()
}

/// Appointments for a patient, most recent first.
pub fn list_for_patient(conn: &Connection, patient_id: i64) -> DbResult<Vec<Appointment>> {
    let sql = format!(
        "SELECT {} FROM appointments WHERE patient_id = ?1 ORDER BY scheduled_for DESC, id DESC",
        APPOINTMENT_COLUMNS
    );
    collect(conn, &sql, patient_id)
}

/// Appointments for a patient that no request points at, oldest first.
pub fn list_unlinked_for_patient(conn: &Connection, patient_id: i64) -> DbResult<Vec<Appointment>> {
    let columns: Vec<String> = APPOINTMENT_COLUMNS
        .split(", ")
        .map(|c| format!("a.{}", c.trim()))
        .collect();
    let sql = format!(
        r#"
        SELECT {}
        FROM appointments a
        LEFT JOIN appointment_requests r ON r.appointment_id = a.id
        WHERE a.patient_id = ?1 AND r.id IS NULL
        ORDER BY a.scheduled_for ASC, a.id ASC
        "#,
        columns.join(", ")
    );
    collect(conn, &sql, patient_id)
}

fn collect(conn: &Connection, sql: &str, patient_id: i64) -> DbResult<Vec<Appointment>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([patient_id], read_row)?;

    let mut appointments = Vec::new();
    for row in rows {
        appointments.push(row?.try_into()?);
    }
    Ok(appointments)
}

impl Database {
    pub fn get_appointment(&self, id: i64) -> DbResult<Option<Appointment>> {
        get_appointment(&self.conn, id)
    }

    pub fn list_appointments_for_patient(&self, patient_id: i64) -> DbResult<Vec<Appointment>> {
        list_for_patient(&self.conn, patient_id)
    }
}

/// Intermediate row struct for database mapping.
struct AppointmentRow {
    id: i64,
    public_id: String,
    patient_id: Option<i64>,
    doctor_id: String,
    scheduled_for: DateTime<Utc>,
    duration_minutes: i64,
    reason: Option<String>,
    additional_notes: Option<String>,
    channel: String,
    priority: String,
    status: String,
    created_by_user: Option<String>,
    intake_payload: String,
    legacy_name: Option<String>,
    legacy_phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        public_id: row.get(1)?,
        patient_id: row.get(2)?,
        doctor_id: row.get(3)?,
        scheduled_for: row.get(4)?,
        duration_minutes: row.get(5)?,
        reason: row.get(6)?,
        additional_notes: row.get(7)?,
        channel: row.get(8)?,
        priority: row.get(9)?,
        status: row.get(10)?,
        created_by_user: row.get(11)?,
        intake_payload: row.get(12)?,
        legacy_name: row.get(13)?,
        legacy_phone: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DbError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let channel = AppointmentChannel::parse(&row.channel)
            .ok_or_else(|| DbError::Constraint(format!("Unknown channel: {}", row.channel)))?;
        let priority = AppointmentPriority::parse(&row.priority)
            .ok_or_else(|| DbError::Constraint(format!("Unknown priority: {}", row.priority)))?;
        let status = AppointmentStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown appointment status: {}", row.status)))?;
        let duration_minutes = u32::try_from(row.duration_minutes)
            .map_err(|_| DbError::Constraint(format!("Invalid duration: {}", row.duration_minutes)))?;

        Ok(Appointment {
            id: row.id,
            public_id: row.public_id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            scheduled_for: row.scheduled_for,
            duration_minutes,
            reason: row.reason,
            additional_notes: row.additional_notes,
            channel,
            priority,
            status,
            created_by_user: row.created_by_user,
            intake_payload: serde_json::from_str(&row.intake_payload)?,
            legacy_name: row.legacy_name,
            legacy_phone: row.legacy_phone,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
