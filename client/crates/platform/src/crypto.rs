//! Cryptographic Utilities

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};

/// Prefix of identifiers produced without a secure generator
pub const FALLBACK_ID_PREFIX: &str = "dev_";

const FALLBACK_ID_LEN: usize = 26;

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Short, log-safe digest of a sensitive identifier
///
/// Returns the first 8 bytes of the SHA-256 digest as lowercase hex.
pub fn fingerprint(value: &str) -> String {
    hex::encode(&sha256(value.as_bytes())[..8])
}

/// Generate a new per-installation identifier
///
/// Prefers a random (v4) UUID from the OS generator. When the OS generator
/// fails, falls back to `dev_` followed by a non-cryptographic random
/// lowercase alphanumeric string.
pub fn device_identifier() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string(),
        Err(err) => {
            tracing::warn!(error = %err, "Secure RNG unavailable, using fallback device id");
            fallback_identifier(time_seed())
        }
    }
}

fn time_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ u64::from(std::process::id()).rotate_left(32)
}

fn fallback_identifier(seed: u64) -> String {
    let suffix: String = StdRng::seed_from_u64(seed)
        .sample_iter(&Alphanumeric)
        .take(FALLBACK_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{FALLBACK_ID_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_values() {
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.to_vec(), expected);
    }

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let a = fingerprint("0b7f3c1e-device");
        assert_eq!(a.len(), 16);
        assert_eq!(a, fingerprint("0b7f3c1e-device"));
        assert_ne!(a, fingerprint("another-device"));
        assert!(!a.contains("device"));
    }

    #[test]
    fn test_device_identifier_is_uuid_v4() {
        let id = device_identifier();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_ne!(id, device_identifier());
    }

    #[test]
    fn test_fallback_identifier_shape() {
        let id = fallback_identifier(7);
        assert!(id.starts_with(FALLBACK_ID_PREFIX));
        assert_eq!(id.len(), FALLBACK_ID_PREFIX.len() + FALLBACK_ID_LEN);
        assert!(
            id[FALLBACK_ID_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
        assert_eq!(id, fallback_identifier(7));
    }
}
