//! Ticket and draw validation
//!
//! Pure checks shared by every entry point that can create a ticket or a
//! draw result. Request bodies arrive as loosely typed JSON; they are checked
//! here once, in a fixed order, and come out as a [`NumberSet`] that the rest
//! of the crate can trust.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::hash::Hash;
use thiserror::Error;

/// Maximum length of a participant-supplied identity, in characters
pub const MAX_IDENTITY_LEN: usize = 20;
/// Fewest numbers a ticket may carry
pub const MIN_TICKET_NUMBERS: usize = 6;
/// Most numbers a ticket may carry
pub const MAX_TICKET_NUMBERS: usize = 10;
/// Smallest number on the board
pub const MIN_NUMBER: i64 = 1;
/// Largest number on the board
pub const MAX_NUMBER: i64 = 45;

/// Reasons a ticket or draw is rejected before anything is persisted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("an identity number is required")]
    MissingIdentity,

    #[error("identity number is too long (maximum {max} characters)", max = MAX_IDENTITY_LEN)]
    IdentityTooLong,

    #[error("a list of numbers is required")]
    MissingNumbers,

    #[error(
        "a ticket must contain between {min} and {max} numbers",
        min = MIN_TICKET_NUMBERS,
        max = MAX_TICKET_NUMBERS
    )]
    WrongCount,

    #[error("duplicate numbers are not allowed")]
    DuplicateNumbers,

    #[error(
        "numbers must be whole numbers between {min} and {max}",
        min = MIN_NUMBER,
        max = MAX_NUMBER
    )]
    OutOfRange,

    #[error("drawn numbers must not be empty")]
    EmptyDraw,
}

impl ValidationError {
    /// Short stable label, used for metrics
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingIdentity => "missing_identity",
            ValidationError::IdentityTooLong => "identity_too_long",
            ValidationError::MissingNumbers => "missing_numbers",
            ValidationError::WrongCount => "wrong_count",
            ValidationError::DuplicateNumbers => "duplicate_numbers",
            ValidationError::OutOfRange => "out_of_range",
            ValidationError::EmptyDraw => "empty_draw",
        }
    }
}

/// An ordered set of board numbers that passed validation.
///
/// Order is the order the numbers were submitted in. Serialized as a plain
/// JSON array, which is also the storage format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumberSet(Vec<u8>);

impl NumberSet {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, number: u8) -> bool {
        self.0.contains(&number)
    }

    /// Count of numbers present in both sets
    pub fn intersection_len(&self, other: &NumberSet) -> usize {
        self.0.iter().filter(|n| other.contains(**n)).count()
    }

    /// Canonical storage encoding
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    /// Decode a stored column. Values were validated on write, so this only
    /// rejects text that is not an array of small unsigned integers.
    pub fn from_json(stored: &str) -> Result<Self, serde_json::Error> {
        Ok(Self(serde_json::from_str(stored)?))
    }
}

/// A ticket that passed every check, ready for admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketCandidate {
    pub identity: String,
    pub numbers: NumberSet,
}

/// Check the participant identity: present and at most [`MAX_IDENTITY_LEN`] characters
pub fn validate_identity(identity: Option<&str>) -> Result<&str, ValidationError> {
    let identity = identity
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingIdentity)?;
    if identity.chars().count() > MAX_IDENTITY_LEN {
        return Err(ValidationError::IdentityTooLong);
    }
    Ok(identity)
}

/// Check a typed list of ticket numbers: count, distinctness, range
pub fn validate_ticket_numbers(numbers: &[i64]) -> Result<NumberSet, ValidationError> {
    check_count(numbers.len())?;
    check_distinct(numbers.iter())?;
    to_number_set(numbers.iter().map(|n| Some(*n)))
}

/// Full ticket check over typed input, in the documented order
pub fn validate_ticket(
    identity: Option<&str>,
    numbers: Option<&[i64]>,
) -> Result<TicketCandidate, ValidationError> {
    let identity = validate_identity(identity)?;
    let numbers = numbers.ok_or(ValidationError::MissingNumbers)?;
    Ok(TicketCandidate {
        identity: identity.to_string(),
        numbers: validate_ticket_numbers(numbers)?,
    })
}

/// Full ticket check over a JSON request body.
///
/// `numbers` may be any JSON value; anything other than an array of 6 to 10
/// distinct integers in range is rejected.
pub fn ticket_from_json(
    identity: Option<&str>,
    numbers: Option<&Value>,
) -> Result<TicketCandidate, ValidationError> {
    let identity = validate_identity(identity)?;
    let items = match numbers {
        None | Some(Value::Null) => return Err(ValidationError::MissingNumbers),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ValidationError::WrongCount),
    };
    check_count(items.len())?;
    let items = normalize_json(items);
    check_distinct_json(&items)?;
    Ok(TicketCandidate {
        identity: identity.to_string(),
        numbers: to_number_set(items.iter().map(Value::as_i64))?,
    })
}

/// Check a typed list of drawn numbers: non-empty, distinct, in range
pub fn validate_draw(numbers: &[i64]) -> Result<NumberSet, ValidationError> {
    if numbers.is_empty() {
        return Err(ValidationError::EmptyDraw);
    }
    check_distinct(numbers.iter())?;
    to_number_set(numbers.iter().map(|n| Some(*n)))
}

/// Check drawn numbers arriving as a JSON request body
pub fn draw_from_json(numbers: Option<&Value>) -> Result<NumberSet, ValidationError> {
    let items = match numbers {
        Some(Value::Array(items)) => items,
        _ => return Err(ValidationError::MissingNumbers),
    };
    if items.is_empty() {
        return Err(ValidationError::EmptyDraw);
    }
    let items = normalize_json(items);
    check_distinct_json(&items)?;
    to_number_set(items.iter().map(Value::as_i64))
}

fn check_count(len: usize) -> Result<(), ValidationError> {
    if (MIN_TICKET_NUMBERS..=MAX_TICKET_NUMBERS).contains(&len) {
        Ok(())
    } else {
        Err(ValidationError::WrongCount)
    }
}

fn check_distinct<'a, T, I>(items: I) -> Result<(), ValidationError>
where
    T: Eq + Hash + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item) {
            return Err(ValidationError::DuplicateNumbers);
        }
    }
    Ok(())
}

// Largest magnitude an f64 holds without losing integer precision
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Integer value of a JSON number, accepting floats with no fractional part (`6.0`)
fn whole_number(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT)
            .map(|f| f as i64)
    })
}

// `6.0` and `6` compare equal after this, for the duplicate check too
fn normalize_json(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .map(|item| whole_number(item).map(Value::from).unwrap_or_else(|| item.clone()))
        .collect()
}

// serde_json::Value is not Hash; arrays here hold at most a few dozen items
fn check_distinct_json(items: &[Value]) -> Result<(), ValidationError> {
    for (i, item) in items.iter().enumerate() {
        if items[..i].contains(item) {
            return Err(ValidationError::DuplicateNumbers);
        }
    }
    Ok(())
}

fn to_number_set<I>(numbers: I) -> Result<NumberSet, ValidationError>
where
    I: IntoIterator<Item = Option<i64>>,
{
    numbers
        .into_iter()
        .map(|n| match n {
            Some(n) if (MIN_NUMBER..=MAX_NUMBER).contains(&n) => Ok(n as u8),
            _ => Err(ValidationError::OutOfRange),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(NumberSet)
}
