//! statkeep-sign — keyed integrity codes for metric samples.
//!
//! When agent and collector share a key, every sample carries a hex
//! HMAC-SHA256 over its canonical encoding:
//!
//! ```text
//! gauge:   "{id}:gauge:{value}"     value in shortest round-trip form
//! counter: "{id}:counter:{delta}"   delta in decimal
//! ```
//!
//! Without a key nothing is signed and nothing is verified.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use statkeep_state::{MetricKind, Sample};

type HmacSha256 = Hmac<Sha256>;

/// Result type alias for signing operations.
pub type IntegrityResult<T> = Result<T, IntegrityError>;

/// A sample failed verification.
///
/// Carries no detail: a missing hash, bad hex and a wrong
/// code are indistinguishable to the caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("sample integrity check failed")]
pub struct IntegrityError;

/// Signs and verifies samples with a shared secret.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Build a signer only when a non-empty key is configured.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(Self::new)
    }

    /// Compute the hex signature of `sample`.
    ///
    /// Fails only when the sample lacks the field its kind requires.
    pub fn sign(&self, sample: &Sample) -> IntegrityResult<String> {
        let mac = self.mac(sample)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Sign `sample` and store the signature on it.
    pub fn sign_in_place(&self, sample: &mut Sample) -> IntegrityResult<()> {
        sample.signature = Some(self.sign(sample)?);
        Ok(())
    }

    /// Check the signature carried by `sample` in constant time.
    pub fn verify(&self, sample: &Sample) -> IntegrityResult<()> {
        let carried = sample.signature.as_deref().ok_or(IntegrityError)?;
        let expected = hex::decode(carried).map_err(|_| IntegrityError)?;
        self.mac(sample)?
            .verify_slice(&expected)
            .map_err(|_| IntegrityError)
    }

    fn mac(&self, sample: &Sample) -> IntegrityResult<HmacSha256> {
        let data = canonical(sample)?;
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| IntegrityError)?;
        mac.update(data.as_bytes());
        Ok(mac)
    }
}

/// The byte string a sample's signature covers.
pub fn canonical(sample: &Sample) -> IntegrityResult<String> {
    match sample.kind {
        MetricKind::Gauge => {
            let value = sample.value.ok_or(IntegrityError)?;
            Ok(format!("{}:gauge:{}", sample.id, value))
        }
        MetricKind::Counter => {
            let delta = sample.delta.ok_or(IntegrityError)?;
            Ok(format!("{}:counter:{}", sample.id, delta))
        }
    }
}
