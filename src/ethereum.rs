//! Ethereum address parsing, private-key validation and the contributor set.
//!
//! Addresses enter the proof system as BN254 scalars: the 20 address bytes are
//! read as a big-endian integer, which is always below the field modulus.

use crate::error::{FieldError, TreeError};
use crate::utils::validate_and_strip_hex;
use anyhow::{Context, Result};
use ark_bn254::Fr;
use ark_ff::PrimeField;
use ethers::types::Address;
use log::debug;
use std::collections::HashMap;

/// Expected length of an Ethereum address in hex characters (excluding 0x prefix)
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Expected length of an Ethereum private key in hex characters (excluding 0x prefix)
pub const PRIVATE_KEY_HEX_LENGTH: usize = 64;

/// Validates an Ethereum private key.
///
/// # Errors
///
/// Returns an error if the key is not 64 hex characters or is all zeros.
pub fn validate_private_key(private_key: &str) -> Result<()> {
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)?;

    if stripped.chars().all(|c| c == '0') {
        return Err(anyhow::anyhow!(
            "Private key cannot be all zeros. Please provide a valid private key."
        ));
    }

    Ok(())
}

/// Parses an address string into an [`Address`].
///
/// Short hex literals such as `0xAAA` are accepted and left-padded, which is
/// how fixture addresses are written in tests.
///
/// # Errors
///
/// Returns [`FieldError::InvalidAddress`] for empty, non-hex or over-long input.
pub fn parse_address(input: &str) -> Result<Address, FieldError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty()
        || digits.len() > ADDRESS_HEX_LENGTH
        || !digits.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(FieldError::InvalidAddress(input.to_string()));
    }

    let padded = format!("{:0>width$}", digits, width = ADDRESS_HEX_LENGTH);
    let bytes = hex::decode(&padded).map_err(|_| FieldError::InvalidAddress(input.to_string()))?;
    Ok(Address::from_slice(&bytes))
}

/// Lowercase `0x` form used in artifacts and logs.
#[must_use]
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Interprets the 20 address bytes as a big-endian field element.
#[must_use]
pub fn address_to_field(address: &Address) -> Fr {
    Fr::from_be_bytes_mod_order(address.as_bytes())
}

/// Ordered, duplicate-free list of registered contributors.
///
/// Registration only ever appends; the position of an address is its leaf
/// index, and the length is the anonymity-set size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContributorSet {
    addresses: Vec<Address>,
    positions: HashMap<Address, usize>,
}

impl ContributorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from an ordered list, rejecting duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DuplicateContributor`] naming both positions.
    pub fn from_addresses<I>(addresses: I) -> Result<Self, TreeError>
    where
        I: IntoIterator<Item = Address>,
    {
        let mut set = Self::new();
        for address in addresses {
            set.register(address)?;
        }
        Ok(set)
    }

    /// Parses and registers address strings in order.
    ///
    /// # Errors
    ///
    /// Fails on the first unparsable or duplicate address.
    pub fn from_strings(addresses: &[String]) -> Result<Self> {
        let mut set = Self::new();
        for (i, raw) in addresses.iter().enumerate() {
            let address = parse_address(raw)
                .with_context(|| format!("Invalid contributor address at line {}", i + 1))?;
            set.register(address)?;
        }
        Ok(set)
    }

    /// Appends a contributor and returns its leaf index.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DuplicateContributor`] if the address is present.
    pub fn register(&mut self, address: Address) -> Result<usize, TreeError> {
        let next = self.addresses.len();
        if let Some(&first) = self.positions.get(&address) {
            return Err(TreeError::DuplicateContributor {
                address: format_address(&address),
                first,
                second: next,
            });
        }
        self.positions.insert(address, next);
        self.addresses.push(address);
        debug!("Registered contributor {} at index {}", format_address(&address), next);
        Ok(next)
    }

    #[must_use]
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.positions.get(address).copied()
    }

    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.positions.contains_key(address)
    }

    #[must_use]
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Anonymity-set cardinality.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_private_key() {
        assert!(validate_private_key(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
        )
        .is_ok());
        assert!(validate_private_key(
            "0x0000000000000000000000000000000000000000000000000000000000000000"
        )
        .is_err());
    }

    #[test]
    fn test_parse_short_address_is_left_padded() {
        let address = parse_address("0xAAA").unwrap();
        assert_eq!(
            format_address(&address),
            "0x0000000000000000000000000000000000000aaa"
        );
        assert_eq!(address_to_field(&address), Fr::from(0xAAAu64));
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(parse_address("").is_err());
        assert!(parse_address("0x").is_err());
        assert!(parse_address("0xgg").is_err());
        assert!(parse_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e00").is_err());
    }

    #[test]
    fn test_contributor_set_preserves_order() {
        let addresses: Vec<Address> = ["0xAAA", "0xBBB", "0xCCC"]
            .iter()
            .map(|a| parse_address(a).unwrap())
            .collect();
        let set = ContributorSet::from_addresses(addresses.clone()).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.addresses(), addresses.as_slice());
        assert_eq!(set.index_of(&addresses[2]), Some(2));
    }

    #[test]
    fn test_contributor_set_rejects_duplicate() {
        let a = parse_address("0xAAA").unwrap();
        let b = parse_address("0xBBB").unwrap();
        let err = ContributorSet::from_addresses(vec![a, b, a]).unwrap_err();
        assert_eq!(
            err,
            TreeError::DuplicateContributor {
                address: format_address(&a),
                first: 0,
                second: 2,
            }
        );
    }

    #[test]
    fn test_contributor_set_from_strings() {
        let raw = vec!["0xAAA".to_string(), "0xaaa".to_string()];
        let err = ContributorSet::from_strings(&raw).unwrap_err();
        assert!(err.to_string().contains("Duplicate contributor"));
    }
}
