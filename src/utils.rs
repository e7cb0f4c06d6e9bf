//! Utility functions for hex validation and BN254 field encodings.
//!
//! Field elements travel in two textual forms: `0x`-prefixed, 64-digit
//! big-endian hex (tree artifacts) and base-10 strings (Groth16 public
//! signals and Solidity calldata). Both parsers reject values at or above the
//! field modulus instead of silently reducing them.

use crate::error::FieldError;
use anyhow::Result;
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

pub const FIELD_BYTES: usize = 32;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if:
/// - The hex string has incorrect length
/// - The hex string contains non-hex characters
///
/// # Examples
///
/// ```
/// use cti_zk_membership::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

fn modulus_of<F: PrimeField>() -> BigUint {
    F::MODULUS.into()
}

/// Parses a canonical prime-field element from `0x` hex or decimal text.
///
/// Generic over the field so the same rules apply to BN254 scalars (public
/// signals) and base-field coordinates (proof points).
///
/// # Errors
/// Returns [`FieldError`] for malformed text or values `>= modulus`.
pub fn parse_prime_field<F: PrimeField>(input: &str) -> Result<F, FieldError> {
    let trimmed = input.trim();
    let value = if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        let digits = strip_hex_prefix(trimmed);
        if digits.is_empty() || !is_valid_hex_string(digits) {
            return Err(FieldError::InvalidHex(input.to_string()));
        }
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .ok_or_else(|| FieldError::InvalidHex(input.to_string()))?
    } else {
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(FieldError::InvalidDecimal(input.to_string()));
        }
        BigUint::parse_bytes(trimmed.as_bytes(), 10)
            .ok_or_else(|| FieldError::InvalidDecimal(input.to_string()))?
    };

    if value >= modulus_of::<F>() {
        return Err(FieldError::NonCanonical(input.to_string()));
    }

    Ok(F::from_be_bytes_mod_order(&value.to_bytes_be()))
}

/// Parses a canonical BN254 scalar from `0x` hex or decimal text.
///
/// # Examples
///
/// ```
/// use cti_zk_membership::utils::{parse_field, field_to_hex};
///
/// let value = parse_field("42").unwrap();
/// assert_eq!(parse_field("0x2a").unwrap(), value);
/// assert_eq!(field_to_hex(&value).len(), 66);
/// ```
pub fn parse_field(input: &str) -> Result<Fr, FieldError> {
    parse_prime_field::<Fr>(input)
}

/// Converts a field element to its 32-byte big-endian representation.
#[inline]
#[must_use]
pub fn field_to_bytes(field: &Fr) -> [u8; FIELD_BYTES] {
    let repr = field.into_bigint().to_bytes_be();
    let mut bytes = [0u8; FIELD_BYTES];
    bytes[FIELD_BYTES - repr.len()..].copy_from_slice(&repr);
    bytes
}

/// `0x`-prefixed, zero-padded 64-digit hex, the artifact encoding.
#[must_use]
pub fn field_to_hex(field: &Fr) -> String {
    format!("0x{}", hex::encode(field_to_bytes(field)))
}

/// Base-10 encoding used for public signals and calldata.
#[must_use]
pub fn prime_field_to_decimal<F: PrimeField>(field: &F) -> String {
    let value: BigUint = field.into_bigint().into();
    value.to_str_radix(10)
}

#[must_use]
pub fn field_to_decimal(field: &Fr) -> String {
    prime_field_to_decimal(field)
}

/// Current unix time in milliseconds.
///
/// # Errors
/// Returns an error if the system clock is before the unix epoch.
pub fn now_millis() -> Result<u64> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| anyhow::anyhow!("System clock unavailable: {}", e))
}
