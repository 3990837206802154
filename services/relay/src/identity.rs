//! Receiver identity generation.
//!
//! A receiver identity is the short code a receiver shares out-of-band so a
//! sender can address it. It is not reserved anywhere and is not a secret.

use crate::error::{RelayError, RelayResult};
use chrono::Utc;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Number of random bytes behind a hex identity
pub const IDENTITY_BYTES: usize = 4;

/// Length of every generated identity
pub const IDENTITY_LEN: usize = IDENTITY_BYTES * 2;

const FALLBACK_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Short opaque code identifying a receiver session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiverIdentity(String);

impl ReceiverIdentity {
    /// Parse an identity typed in by a user.
    ///
    /// Surrounding whitespace is ignored. The identity becomes a database path
    /// segment and an object key prefix, so only `[A-Za-z0-9_-]` is accepted.
    pub fn parse(input: &str) -> RelayResult<Self> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(RelayError::InputMissing(
                "Receiver ID cannot be empty".to_string(),
            ));
        }

        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(RelayError::InvalidInput(format!(
                "Receiver ID contains unsupported character {:?}",
                bad
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiverIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReceiverIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generate a fresh identity from the operating system's random source
pub fn generate() -> ReceiverIdentity {
    generate_with(&mut OsRng)
}

/// Generate an identity from `rng`, falling back to a clock-seeded
/// non-cryptographic generator if `rng` cannot produce bytes.
pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> ReceiverIdentity {
    let mut bytes = [0u8; IDENTITY_BYTES];

    match rng.try_fill_bytes(&mut bytes) {
        Ok(()) => ReceiverIdentity(hex::encode(bytes)),
        Err(e) => {
            let err = RelayError::RandomSourceUnavailable(e.to_string());
            warn!(error = %err, "Falling back to non-cryptographic receiver ID");
            metrics::counter!("relay.identity.fallback").increment(1);
            fallback_identity()
        }
    }
}

fn fallback_identity() -> ReceiverIdentity {
    let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64
        ^ u64::from(std::process::id()).rotate_left(32);
    let mut rng = StdRng::seed_from_u64(seed);

    let code: String = (0..IDENTITY_LEN)
        .map(|_| FALLBACK_ALPHABET[rng.gen_range(0..FALLBACK_ALPHABET.len())] as char)
        .collect();

    ReceiverIdentity(code)
}
