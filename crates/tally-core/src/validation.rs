//! # Validation Module
//!
//! Input validation for everything that enters the drawer ledger.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Collaborator (order capture, back-office UI)                 │
//! │  └── Format checks, immediate operator feedback                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: tally-engine                                                 │
//! │  └── THIS MODULE: amounts, ids, movement types                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Ledger Store (SQLite)                                        │
//! │  ├── CHECK constraints on amounts and states                           │
//! │  └── UNIQUE live session per drawer                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation failures are never retried.

use crate::error::ValidationError;
use crate::money::{Money, MAX_AMOUNT_MINOR, MINOR_PER_MAJOR};
use crate::types::MovementType;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted identifier (drawer, cashier, movement, operation).
pub const MAX_ID_LEN: usize = 64;

/// Longest accepted free-text description or note.
pub const MAX_TEXT_LEN: usize = 500;

// =============================================================================
// Amount Validators
// =============================================================================

/// Parses a decimal major-unit amount (`"145.50"`) into minor units.
///
/// ## Rules
/// - Optional leading `-`
/// - Digits, optionally followed by `.` and at most two fractional digits
/// - No exponents, no `NaN`/`inf`, no thousands separators
/// - Must fit in i64 minor units
///
/// ```rust
/// use tally_core::validation::parse_amount;
///
/// assert_eq!(parse_amount("145.5").unwrap().minor(), 14_550);
/// assert_eq!(parse_amount("-0.05").unwrap().minor(), -5);
/// assert!(parse_amount("NaN").is_err());
/// assert!(parse_amount("1e3").is_err());
/// assert!(parse_amount("1.005").is_err());
/// ```
pub fn parse_amount(input: &str) -> ValidationResult<Money> {
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "amount".to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "amount".to_string(),
        });
    }

    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (whole, fraction) = match unsigned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (unsigned, ""),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("must be a finite decimal number"));
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("must be a finite decimal number"));
    }
    if fraction.len() > 2 {
        return Err(invalid("at most two decimal places are allowed"));
    }
    if unsigned.ends_with('.') {
        return Err(invalid("missing digits after decimal point"));
    }

    let overflow = || invalid("amount is too large");

    let major: i64 = whole.parse().map_err(|_| overflow())?;
    let minor: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| overflow())? * 10,
        _ => fraction.parse().map_err(|_| overflow())?,
    };

    let magnitude = major
        .checked_mul(MINOR_PER_MAJOR)
        .and_then(|m| m.checked_add(minor))
        .ok_or_else(overflow)?;

    Ok(Money::from_minor(if negative { -magnitude } else { magnitude }))
}

fn ensure_in_range(field: &str, amount: Money, min: i64) -> ValidationResult<()> {
    if amount.minor() < min || !amount.is_within_limit() {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max: MAX_AMOUNT_MINOR,
        });
    }
    Ok(())
}

/// Validates an opening float (0 ..= [`MAX_AMOUNT_MINOR`]).
pub fn validate_opening_amount(amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "opening amount".to_string(),
        });
    }
    ensure_in_range("opening amount", amount, 0)
}

/// Validates a physically counted amount (0 ..= [`MAX_AMOUNT_MINOR`]).
pub fn validate_counted_amount(amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "counted amount".to_string(),
        });
    }
    ensure_in_range("counted amount", amount, 0)
}

/// Validates a movement magnitude (1 ..= [`MAX_AMOUNT_MINOR`]); the type
/// supplies the sign.
pub fn validate_movement_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "movement amount".to_string(),
        });
    }
    ensure_in_range("movement amount", amount, 1)
}

/// Rejects movement types that only the reconciliation engine may write.
pub fn validate_external_movement_type(movement_type: MovementType) -> ValidationResult<()> {
    if !movement_type.is_external() {
        return Err(ValidationError::NotAllowed {
            field: "movement type".to_string(),
            allowed: MovementType::ALL
                .iter()
                .filter(|t| t.is_external())
                .map(|t| t.as_str().to_string())
                .collect(),
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates an identifier (drawer, cashier, movement, operation).
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, digits, `-`, `_`, `:` and `.` only
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, digits, '-', '_', ':' and '.'".to_string(),
        });
    }

    Ok(())
}

/// Validates free text (descriptions, annotations).
pub fn validate_text(field: &str, text: &str) -> ValidationResult<()> {
    if text.len() > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
