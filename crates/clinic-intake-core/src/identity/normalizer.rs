//! Contact field normalizer.
//!
//! Handles:
//! - Blank-to-absent text cleanup
//! - Lenient birth-date parsing (calendar date, epoch millis, assorted text)
//! - Gender allow-list
//! - Age sanity and whole-years-elapsed derivation

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

use crate::models::{DateInput, Gender};

/// Oldest plausible age; anything above is discarded.
pub const MAX_AGE: u32 = 130;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Field normalizer, anchored to a reference day for age computation.
#[derive(Debug, Clone, Copy)]
pub struct ContactNormalizer {
    today: NaiveDate,
}

impl Default for ContactNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactNormalizer {
    /// Normalizer anchored to the current UTC date.
    pub fn new() -> Self {
        Self::as_of(Utc::now().date_naive())
    }

    pub fn as_of(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Trimmed text, or `None` when blank.
    pub fn text(&self, value: Option<&str>) -> Option<String> {
        value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
    }

    /// Trimmed email with a plausible `local@domain` shape.
    pub fn email(&self, value: Option<&str>) -> Option<String> {
        self.text(value).filter(|e| is_plausible_email(e))
    }

    pub fn gender(&self, value: Option<&str>) -> Option<Gender> {
        value.and_then(Gender::parse)
    }

    /// Parse a birth date leniently. Unparseable input and future dates are absent.
    pub fn birth_date(&self, value: Option<&DateInput>) -> Option<NaiveDate> {
        let date = match value? {
            DateInput::Date(date) => Some(*date),
            DateInput::Timestamp(millis) => DateTime::from_timestamp_millis(*millis).map(|dt| dt.date_naive()),
            DateInput::Text(text) => parse_date_text(text),
        }?;
        (date <= self.today).then_some(date)
    }

    /// Explicit age within `0..=MAX_AGE`; negatives and absurd values are absent.
    pub fn age(&self, value: Option<i64>) -> Option<u32> {
        value
            .and_then(|a| u32::try_from(a).ok())
            .filter(|a| *a <= MAX_AGE)
    }

    /// Whole years elapsed between `birth` and the reference day.
    pub fn age_from_birth(&self, birth: NaiveDate) -> Option<u32> {
        age_on(birth, self.today)
    }
}

/// Whole years elapsed from `birth` to `today`: calendar-year difference,
/// minus one when the birthday has not come around yet. `None` if negative.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// Age as of the current UTC date.
pub fn calculate_age(birth: NaiveDate) -> Option<u32> {
    age_on(birth, Utc::now().date_naive())
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Loose syntactic check: one `@`, non-empty local part, dotted domain, no spaces.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|part| !part.is_empty())
}

/// The part before `@`, used as a last-resort display name.
pub fn email_local_part(email: &str) -> Option<&str> {
    email.split('@').next().map(str::trim).filter(|s| !s.is_empty())
}
