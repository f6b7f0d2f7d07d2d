//! Recipient key selection.
//!
//! rpgp doesn't have a policy system like sequoia, so choosing which
//! subkeys a message is encrypted to is done by hand here.

use chrono::{DateTime, Duration, Utc};
use pgp::composed::{SignedPublicKey, SignedPublicSubKey};
use pgp::packet::{Signature, SignatureType};
use pgp::types::PublicKeyTrait;

use super::issued_by;
use crate::error::{Error, Result};

/// Check if a key has expired based on its creation time and validity period.
pub(crate) fn is_key_expired(
    created: DateTime<Utc>,
    validity_seconds: Option<u64>,
    now: DateTime<Utc>,
) -> bool {
    match validity_seconds.and_then(|secs| i64::try_from(secs).ok()) {
        None | Some(0) => false,
        Some(validity) => created + Duration::seconds(validity) < now,
    }
}

/// Signatures on `subkey` of type `typ` that verify against the primary.
fn verified<'a>(
    primary: &'a SignedPublicKey,
    subkey: &'a SignedPublicSubKey,
    typ: SignatureType,
) -> impl Iterator<Item = &'a Signature> + 'a {
    subkey.signatures.iter().filter(move |sig| {
        sig.typ() == Some(typ)
            && issued_by(sig, &primary.primary_key)
            && sig
                .verify_subkey_binding(&primary.primary_key, &subkey.key)
                .is_ok()
    })
}

/// Check if a subkey is revoked.
pub(crate) fn is_subkey_revoked(primary: &SignedPublicKey, subkey: &SignedPublicSubKey) -> bool {
    verified(primary, subkey, SignatureType::SubkeyRevocation)
        .next()
        .is_some()
}

/// The most recent valid binding signature of a subkey.
fn latest_binding<'a>(
    primary: &'a SignedPublicKey,
    subkey: &'a SignedPublicSubKey,
) -> Option<&'a Signature> {
    verified(primary, subkey, SignatureType::SubkeyBinding).max_by_key(|sig| sig.created().copied())
}

/// A subkey is usable when it is bound, neither revoked nor expired, and
/// its binding allows encryption.
pub(crate) fn is_encryption_subkey(primary: &SignedPublicKey, subkey: &SignedPublicSubKey) -> bool {
    if !subkey.key.is_encryption_key() || is_subkey_revoked(primary, subkey) {
        return false;
    }
    let Some(binding) = latest_binding(primary, subkey) else {
        return false;
    };

    let flags = binding.key_flags();
    if !(flags.encrypt_comms() || flags.encrypt_storage()) {
        return false;
    }

    let validity = binding
        .key_expiration_time()
        .and_then(|validity| u64::try_from(validity.num_seconds()).ok());
    !is_key_expired(*subkey.key.created_at(), validity, Utc::now())
}

/// Valid subkeys of `key` flagged for encryption.
pub(crate) fn encryption_subkeys(key: &SignedPublicKey) -> Result<Vec<SignedPublicSubKey>> {
    let valid_keys: Vec<SignedPublicSubKey> = key
        .public_subkeys
        .iter()
        .filter(|subkey| is_encryption_subkey(key, subkey))
        .cloned()
        .collect();

    if valid_keys.is_empty() {
        return Err(Error::NoEncryptionSubkey);
    }
    Ok(valid_keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn zero_or_missing_validity_never_expires() {
        let long_ago = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        let now = Utc::now();
        assert!(!is_key_expired(long_ago, None, now));
        assert!(!is_key_expired(long_ago, Some(0), now));
        assert!(is_key_expired(long_ago, Some(60), now));
        assert!(!is_key_expired(now, Some(3600), now));
    }

    #[test]
    fn certified_key_keeps_its_encryption_subkey() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/files/bob_certified_by_alice.asc");
        let key = crate::internal::parse_public_key(&std::fs::read_to_string(path).unwrap()).unwrap();
        let subkeys = encryption_subkeys(&key).unwrap();
        assert_eq!(subkeys.len(), 1);
    }
}
