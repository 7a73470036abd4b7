//! Client records and line validation
//!
//! A [`ClientRecord`] can only be obtained from [`classify`], which checks the
//! line shape first and then validates every field, collecting all field
//! violations so one bad line reports all of its problems at once.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Field separator of the inbound record format
pub const FIELD_DELIMITER: char = '|';

/// Number of fields in a record line: `id|firstName|lastName|email|age`
pub const FIELD_COUNT: usize = 5;

pub const MIN_AGE: i64 = 1;
pub const MAX_AGE: i64 = 120;

pub const MSG_INVALID_FORMAT: &str = "Invalid line format. Must have exactly 5 fields separated by |";
pub const MSG_EMPTY_ID: &str = "ID cannot be empty";
pub const MSG_EMPTY_FIRST_NAME: &str = "First name cannot be empty";
pub const MSG_EMPTY_LAST_NAME: &str = "Last name cannot be empty";
pub const MSG_INVALID_EMAIL: &str = "Invalid email";
pub const MSG_AGE_NOT_NUMBER: &str = "Age must be a number";
pub const MSG_AGE_NOT_INTEGER: &str = "Age must be an integer";
pub const MSG_AGE_TOO_LOW: &str = "Age must be greater than 0";
pub const MSG_AGE_TOO_HIGH: &str = "Age cannot be greater than 120";

// Local part per RFC 5322 atext, domain of dot-separated labels with at least one dot.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{}~-]+)*@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .unwrap_or_else(|e| unreachable!("email pattern is a constant: {e}"))
});

/// A validated client row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    age: u8,
    original_line: String,
}

impl ClientRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn age(&self) -> u8 {
        self.age
    }

    /// The line this record was parsed from, untouched
    pub fn original_line(&self) -> &str {
        &self.original_line
    }
}

/// The identity token of a line: its first field, trimmed
///
/// Used for batched duplicate lookups before any validation happens.
pub fn extract_id(line: &str) -> &str {
    line.split(FIELD_DELIMITER).next().unwrap_or_default().trim()
}

/// Parse one record line into a [`ClientRecord`] or the list of violations
pub fn classify(line: &str) -> Result<ClientRecord, Vec<String>> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() != FIELD_COUNT || fields.iter().any(|f| f.is_empty()) {
        return Err(vec![MSG_INVALID_FORMAT.to_string()]);
    }

    let id = fields[0].trim();
    let first_name = fields[1].trim();
    let last_name = fields[2].trim();
    let email = fields[3].trim();

    let mut errors = Vec::new();

    if id.is_empty() {
        errors.push(MSG_EMPTY_ID.to_string());
    }
    if first_name.is_empty() {
        errors.push(MSG_EMPTY_FIRST_NAME.to_string());
    }
    if last_name.is_empty() {
        errors.push(MSG_EMPTY_LAST_NAME.to_string());
    }
    if !EMAIL_RE.is_match(email) {
        errors.push(MSG_INVALID_EMAIL.to_string());
    }

    let age = match validate_age(fields[4].trim()) {
        Ok(age) => Some(age),
        Err(message) => {
            errors.push(message.to_string());
            None
        },
    };

    match age {
        Some(age) if errors.is_empty() => Ok(ClientRecord {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            age,
            original_line: line.to_string(),
        }),
        _ => Err(errors),
    }
}

fn validate_age(raw: &str) -> Result<u8, &'static str> {
    let value = match raw.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            return match raw.parse::<f64>() {
                Ok(f) if f.is_finite() => Err(MSG_AGE_NOT_INTEGER),
                _ => Err(MSG_AGE_NOT_NUMBER),
            };
        },
    };

    if value < MIN_AGE {
        return Err(MSG_AGE_TOO_LOW);
    }
    if value > MAX_AGE {
        return Err(MSG_AGE_TOO_HIGH);
    }

    u8::try_from(value).map_err(|_| MSG_AGE_TOO_HIGH)
}
