//! Internal helper functions.
//!
//! Conversions from rpgp's packet types to the crate's key material.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey};
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::packet::{Signature, SignatureType};
use pgp::types::{
    EcdhPublicParams, EcdsaPublicParams, KeyDetails, PublicKeyTrait, PublicParams, Tag,
};
use rsa::traits::PublicKeyParts;

use crate::error::{Error, Result};
use crate::material::{
    KeyComponent, KeyMaterial, SignatureKind, SignatureRecord, SubkeyMaterial, UserMaterial,
};
use crate::types::{Capabilities, Capability};

/// Parse an armored secret key.
pub(crate) fn parse_secret_key(armored: &str) -> Result<SignedSecretKey> {
    let (key, _headers) = SignedSecretKey::from_armor_single(Cursor::new(armored.as_bytes()))
        .map_err(|e| Error::Parse(e.to_string()))?;
    Ok(key)
}

/// Parse an armored public key. Secret keys are not accepted here.
pub(crate) fn parse_public_key(armored: &str) -> Result<SignedPublicKey> {
    let (key, _headers) = SignedPublicKey::from_armor_single(Cursor::new(armored.as_bytes()))
        .map_err(|e| Error::Parse(e.to_string()))?;
    Ok(key)
}

/// Whether any secret component of the key is passphrase-protected.
///
/// The primary and the subkeys are protected independently; a key with a
/// plain primary can still carry protected subkeys.
pub(crate) fn is_secret_encrypted(key: &SignedSecretKey) -> bool {
    key.primary_key.secret_params().is_encrypted()
        || key
            .secret_subkeys
            .iter()
            .any(|subkey| subkey.key.secret_params().is_encrypted())
}

/// Get a normalized algorithm name for display.
pub(crate) fn algorithm_name(key: &impl KeyDetails) -> String {
    match key.algorithm() {
        PublicKeyAlgorithm::RSA | PublicKeyAlgorithm::RSAEncrypt | PublicKeyAlgorithm::RSASign => {
            "RSA".to_string()
        }
        PublicKeyAlgorithm::EdDSALegacy | PublicKeyAlgorithm::Ed25519 => "EdDSA".to_string(),
        PublicKeyAlgorithm::ECDH => "ECDH".to_string(),
        PublicKeyAlgorithm::ECDSA => "ECDSA".to_string(),
        PublicKeyAlgorithm::X25519 => "X25519".to_string(),
        PublicKeyAlgorithm::X448 => "X448".to_string(),
        PublicKeyAlgorithm::Ed448 => "Ed448".to_string(),
        PublicKeyAlgorithm::DSA => "DSA".to_string(),
        PublicKeyAlgorithm::Elgamal => "Elgamal".to_string(),
        algo => format!("{:?}", algo),
    }
}

/// Curve name for elliptic-curve keys, in GnuPG's spelling.
pub(crate) fn curve_name(key: &impl PublicKeyTrait) -> Option<String> {
    let name = match key.public_params() {
        PublicParams::EdDSALegacy(_) | PublicParams::Ed25519(_) => "ed25519",
        PublicParams::X25519(_) => "cv25519",
        PublicParams::X448(_) => "cv448",
        PublicParams::Ed448(_) => "ed448",
        PublicParams::ECDSA(ecdsa) => match ecdsa {
            EcdsaPublicParams::P256 { .. } => "nistp256",
            EcdsaPublicParams::P384 { .. } => "nistp384",
            EcdsaPublicParams::P521 { .. } => "nistp521",
            _ => return Some(format!("{:?}", key.algorithm())),
        },
        PublicParams::ECDH(ecdh) => match ecdh {
            EcdhPublicParams::Curve25519 { .. } => "cv25519",
            EcdhPublicParams::P256 { .. } => "nistp256",
            EcdhPublicParams::P384 { .. } => "nistp384",
            EcdhPublicParams::P521 { .. } => "nistp521",
            _ => return Some(format!("{:?}", key.algorithm())),
        },
        _ => return None,
    };
    Some(name.to_string())
}

/// Modulus size for RSA keys. Elliptic-curve keys report their curve
/// instead.
pub(crate) fn bit_size(key: &impl PublicKeyTrait) -> Option<u32> {
    match key.public_params() {
        PublicParams::RSA(params) => u32::try_from(params.key.n().bits()).ok(),
        _ => None,
    }
}

/// Usage flags bound by a signature.
pub(crate) fn capabilities(sig: &Signature) -> Capabilities {
    let flags = sig.key_flags();
    let mut caps = Capabilities::empty();
    if flags.certify() {
        caps.insert(Capability::Certify);
    }
    if flags.sign() {
        caps.insert(Capability::Sign);
    }
    if flags.encrypt_comms() || flags.encrypt_storage() {
        caps.insert(Capability::Encrypt);
    }
    if flags.authentication() {
        caps.insert(Capability::Authenticate);
    }
    caps
}

fn signature_kind(sig: &Signature) -> SignatureKind {
    match sig.typ() {
        Some(
            SignatureType::CertGeneric
            | SignatureType::CertPersona
            | SignatureType::CertCasual
            | SignatureType::CertPositive,
        ) => SignatureKind::Certification,
        Some(SignatureType::Key) => SignatureKind::DirectKey,
        Some(SignatureType::SubkeyBinding) => SignatureKind::SubkeyBinding,
        Some(SignatureType::KeyRevocation) => SignatureKind::KeyRevocation,
        Some(SignatureType::SubkeyRevocation) => SignatureKind::SubkeyRevocation,
        Some(SignatureType::CertRevocation) => SignatureKind::CertificationRevocation,
        _ => SignatureKind::Other,
    }
}

/// Whether `sig` may have been issued by `key`.
///
/// A signature without issuer subpackets stays a candidate; only the
/// cryptographic check can rule it out.
pub(crate) fn issued_by(sig: &Signature, key: &impl KeyDetails) -> bool {
    let key_ids = sig.issuer();
    let fingerprints = sig.issuer_fingerprint();
    if key_ids.is_empty() && fingerprints.is_empty() {
        return true;
    }
    let key_id = key.key_id();
    let fingerprint = key.fingerprint();
    key_ids.into_iter().any(|id| *id == key_id)
        || fingerprints.into_iter().any(|fp| *fp == fingerprint)
}

/// Summarize one self-signature. `valid` is the outcome of checking it
/// against the primary key.
fn signature_record(sig: &Signature, valid: bool) -> SignatureRecord {
    let caps = capabilities(sig);
    SignatureRecord {
        kind: signature_kind(sig),
        created: sig.created().copied(),
        key_flags: (!caps.is_empty()).then_some(caps),
        key_validity_secs: sig
            .key_expiration_time()
            .and_then(|validity| u64::try_from(validity.num_seconds()).ok()),
        valid,
    }
}

fn component(key: &impl PublicKeyTrait) -> KeyComponent {
    KeyComponent {
        fingerprint: key.fingerprint().as_bytes().to_vec(),
        key_id: key.key_id().as_ref().to_vec(),
        algorithm: algorithm_name(key),
        curve: curve_name(key),
        bit_size: bit_size(key),
        created: *key.created_at(),
    }
}

/// Flatten a parsed key into [`KeyMaterial`], keeping packet order.
///
/// Only signatures issued by the primary key are kept. Certifications by
/// other keys say nothing about this key's usage or lifetime.
pub(crate) fn key_material(
    key: &SignedPublicKey,
    is_secret: bool,
    secret_encrypted: bool,
) -> KeyMaterial {
    let primary_key = &key.primary_key;

    let direct_signatures = key
        .details
        .revocation_signatures
        .iter()
        .chain(key.details.direct_signatures.iter())
        .filter(|sig| issued_by(sig, primary_key))
        .map(|sig| signature_record(sig, sig.verify_key(primary_key).is_ok()))
        .collect();

    let users = key
        .details
        .users
        .iter()
        .map(|user| UserMaterial {
            id: String::from_utf8_lossy(user.id.id()).to_string(),
            signatures: user
                .signatures
                .iter()
                .filter(|sig| issued_by(sig, primary_key))
                .map(|sig| {
                    let valid = sig
                        .verify_certification(primary_key, Tag::UserId, &user.id)
                        .is_ok();
                    signature_record(sig, valid)
                })
                .collect(),
        })
        .collect();

    let subkeys = key
        .public_subkeys
        .iter()
        .map(|subkey| SubkeyMaterial {
            component: component(&subkey.key),
            signatures: subkey
                .signatures
                .iter()
                .filter(|sig| issued_by(sig, primary_key))
                .map(|sig| {
                    let valid = sig.verify_subkey_binding(primary_key, &subkey.key).is_ok();
                    signature_record(sig, valid)
                })
                .collect(),
        })
        .collect();

    let third_party = key
        .details
        .users
        .iter()
        .flat_map(|user| user.signatures.iter())
        .filter(|sig| !issued_by(sig, primary_key))
        .count();
    if third_party > 0 {
        tracing::debug!(third_party, "ignoring certifications issued by other keys");
    }

    KeyMaterial {
        is_secret,
        secret_encrypted,
        primary: component(primary_key),
        direct_signatures,
        users,
        subkeys,
    }
}

/// First user ID of a key, for "signed by" display.
pub(crate) fn primary_user_id(key: &SignedPublicKey) -> Option<String> {
    key.details
        .users
        .first()
        .map(|u| String::from_utf8_lossy(u.id.id()).to_string())
}

/// Signature creation time, for verification results.
pub(crate) fn signed_at(sig: &Signature) -> Option<DateTime<Utc>> {
    sig.created().copied()
}

/// Normalize CRLF line endings to LF.
pub(crate) fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("files")
            .join(name);
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn third_party_certifications_are_dropped() {
        let key = parse_public_key(&fixture("bob_certified_by_alice.asc")).unwrap();
        // GnuPG attaches Alice's certification next to Bob's self-signature.
        assert_eq!(key.details.users[0].signatures.len(), 2);

        let material = key_material(&key, false, false);
        let sigs = &material.users[0].signatures;
        assert_eq!(sigs.len(), 1);
        assert!(sigs[0].valid);
        assert!(sigs[0].key_validity_secs.is_some());
        assert!(material.subkeys[0].signatures.iter().all(|sig| sig.valid));
    }

    #[test]
    fn self_signatures_are_verified() {
        let key = parse_public_key(&fixture("alice_public.asc")).unwrap();
        let material = key_material(&key, false, false);
        assert!(material.users[0].signatures.iter().all(|sig| sig.valid));

        // Bob's self-signature checked against Alice's primary fails.
        let bob = parse_public_key(&fixture("bob_public.asc")).unwrap();
        let sig = &bob.details.users[0].signatures[0];
        assert!(!issued_by(sig, &key.primary_key));
        assert!(sig
            .verify_certification(&key.primary_key, Tag::UserId, &bob.details.users[0].id)
            .is_err());
    }

    #[test]
    fn protection_is_tracked_per_component() {
        let carol = parse_secret_key(&fixture("carol_mixed_secret.asc")).unwrap();
        assert!(!carol.primary_key.secret_params().is_encrypted());
        assert!(carol.secret_subkeys[0].key.secret_params().is_encrypted());
        assert!(is_secret_encrypted(&carol));

        let alice = parse_secret_key(&fixture("alice_secret.asc")).unwrap();
        assert!(!is_secret_encrypted(&alice));
    }
}
