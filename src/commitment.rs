//! Per-submission commitments: `Commitment = Poseidon2(address, nonce)`.
//!
//! The commitment is public and doubles as the replay key; the nonce is
//! secret, lives only in memory and must be fresh for every submission.

use crate::error::FieldError;
use crate::ethereum::address_to_field;
use crate::hash::CircuitHasher;
use crate::utils::{field_to_decimal, field_to_hex, parse_field};
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use ark_std::UniformRand;
use ethers::types::Address;
use log::warn;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::str::FromStr;

/// Nonces with fewer significant bits than this are accepted but flagged.
pub const MIN_NONCE_BITS: u32 = 128;

/// Secret per-submission randomness. Never serialized; `Debug` is redacted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce(Fr);

impl Nonce {
    /// Uniform field element from a cryptographic RNG.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Nonce(Fr::rand(rng))
    }

    /// Uniform field element from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::random(&mut OsRng)
    }

    /// Wraps a caller-chosen field element, warning when it is guessable.
    #[must_use]
    pub fn from_field(value: Fr) -> Self {
        let nonce = Nonce(value);
        if nonce.is_low_entropy() {
            warn!(
                "Nonce has fewer than {} significant bits; commitments made with it can be brute-forced",
                MIN_NONCE_BITS
            );
        }
        nonce
    }

    #[must_use]
    pub fn is_low_entropy(&self) -> bool {
        self.0.into_bigint().num_bits() < MIN_NONCE_BITS
    }

    #[must_use]
    pub fn as_field(&self) -> Fr {
        self.0
    }
}

impl FromStr for Nonce {
    type Err = FieldError;

    /// Decimal or `0x` hex; values at or above the field modulus are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_field(s).map(Nonce::from_field)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Nonce(<redacted>)")
    }
}

/// Public commitment value bound to one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment(Fr);

impl Commitment {
    #[must_use]
    pub fn from_field(value: Fr) -> Self {
        Commitment(value)
    }

    #[must_use]
    pub fn as_field(&self) -> Fr {
        self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        field_to_hex(&self.0)
    }

    #[must_use]
    pub fn to_decimal(&self) -> String {
        field_to_decimal(&self.0)
    }
}

impl FromStr for Commitment {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_field(s).map(Commitment)
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// `Poseidon2(address, nonce)`.
#[must_use]
pub fn make_commitment(address: &Address, nonce: &Nonce, hasher: &CircuitHasher) -> Commitment {
    Commitment(hasher.hash2(address_to_field(address), nonce.as_field()))
}
