//! Key inspection.
//!
//! Turns armored key text into a [`KeyInfo`]. The armor framing is checked
//! here, the packets are parsed by the [`CryptoBackend`], and the
//! signature-level decisions (which self-signature is current, what is
//! revoked, when the key expires) are made here from the backend's
//! [`KeyMaterial`].

use chrono::{DateTime, Utc};

use crate::armor::{self, BlockKind};
use crate::backend::CryptoBackend;
use crate::classify::{classify, ClassifiedError};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::material::{KeyMaterial, SignatureKind, SignatureRecord};
use crate::types::{Capabilities, KeyInfo, KeyKind, OperationKind, SubkeyInfo};

/// Inspect an armored public or private key.
///
/// Leading and trailing whitespace is ignored. Every failure, including
/// malformed armor and backend parse errors, comes back as a
/// [`ClassifiedError`] of kind `InvalidKeyFormat`.
///
/// # Example
/// ```no_run
/// use pgpworkbench::{inspect, Config, RpgpBackend};
///
/// let armored = std::fs::read_to_string("alice.asc").unwrap();
/// let info = inspect(&RpgpBackend::new(), &armored, &Config::default()).unwrap();
/// println!("{} {}", info.kind, info.fingerprint);
/// ```
pub fn inspect(
    backend: &dyn CryptoBackend,
    armored: &str,
    config: &Config,
) -> std::result::Result<KeyInfo, ClassifiedError> {
    inspect_for(backend, armored, OperationKind::Inspect, config)
}

/// Inspect a key supplied to `operation`, classifying failures for that
/// operation's key field.
pub(crate) fn inspect_for(
    backend: &dyn CryptoBackend,
    armored: &str,
    operation: OperationKind,
    config: &Config,
) -> std::result::Result<KeyInfo, ClassifiedError> {
    inspect_raw(backend, armored, config).map_err(|e| classify(&e, operation))
}

fn inspect_raw(backend: &dyn CryptoBackend, armored: &str, config: &Config) -> Result<KeyInfo> {
    config.check_size(armored)?;
    let text = armored.trim();

    let block = armor::check_single(text, config.require_checksum).map_err(Error::KeyArmor)?;
    let kind = match block {
        BlockKind::PublicKey => KeyKind::Public,
        BlockKind::PrivateKey => KeyKind::Private,
        other => return Err(Error::Parse(format!("expected a key block, found {other}"))),
    };

    let material = backend.parse_key(text)?;
    match (kind, material.is_secret) {
        (KeyKind::Private, false) => {
            return Err(Error::Parse(
                "private key block contains no secret key material".to_string(),
            ))
        }
        (KeyKind::Public, true) => {
            return Err(Error::Parse(
                "public key block contains secret key material".to_string(),
            ))
        }
        _ => {}
    }

    Ok(derive_key_info(kind, &material))
}

/// Build a [`KeyInfo`] from parsed key material.
///
/// - A key revocation revokes every primary-key binding; a certification
///   revocation revokes every certification on its user ID; a subkey
///   revocation revokes every binding of that subkey.
/// - Capabilities are the union of the usage flags on valid, non-revoked
///   bindings.
/// - Expiration comes from the most recent valid binding by signature
///   creation time, later packets winning ties.
pub fn derive_key_info(kind: KeyKind, material: &KeyMaterial) -> KeyInfo {
    let primary = &material.primary;

    let key_revoked = material
        .direct_signatures
        .iter()
        .any(|s| s.valid && s.kind == SignatureKind::KeyRevocation);

    let mut all_bindings = Vec::new();
    let mut live_bindings = Vec::new();

    for sig in &material.direct_signatures {
        if sig.valid && sig.kind == SignatureKind::DirectKey {
            all_bindings.push(sig);
            if !key_revoked {
                live_bindings.push(sig);
            }
        }
    }
    for user in &material.users {
        let user_revoked = user
            .signatures
            .iter()
            .any(|s| s.valid && s.kind == SignatureKind::CertificationRevocation);
        for sig in &user.signatures {
            if sig.valid && sig.kind == SignatureKind::Certification {
                all_bindings.push(sig);
                if !key_revoked && !user_revoked {
                    live_bindings.push(sig);
                }
            }
        }
    }

    let capabilities = union_flags(&live_bindings);
    let current = latest(&live_bindings).or_else(|| latest(&all_bindings));
    let expiration_date = current.and_then(|sig| expiration(primary.created, sig));

    let subkeys = material
        .subkeys
        .iter()
        .map(|subkey| {
            let is_revoked = subkey
                .signatures
                .iter()
                .any(|s| s.valid && s.kind == SignatureKind::SubkeyRevocation);
            let bindings: Vec<&SignatureRecord> = subkey
                .signatures
                .iter()
                .filter(|s| s.valid && s.kind == SignatureKind::SubkeyBinding)
                .collect();
            let capabilities = if is_revoked {
                Capabilities::empty()
            } else {
                union_flags(&bindings)
            };
            let expiration_date = latest(&bindings)
                .and_then(|sig| expiration(subkey.component.created, sig));

            SubkeyInfo {
                key_id: hex::encode(&subkey.component.key_id),
                fingerprint: hex::encode(&subkey.component.fingerprint),
                algorithm: subkey.component.algorithm.clone(),
                curve: subkey.component.curve.clone(),
                bit_size: subkey.component.bit_size,
                created: subkey.component.created,
                expiration_date,
                capabilities,
                is_revoked,
            }
        })
        .collect();

    let info = KeyInfo {
        kind,
        key_id: hex::encode(&primary.key_id),
        fingerprint: hex::encode(&primary.fingerprint),
        algorithm: primary.algorithm.clone(),
        curve: primary.curve.clone(),
        bit_size: primary.bit_size,
        created: primary.created,
        expiration_date,
        is_encrypted: kind == KeyKind::Private && material.secret_encrypted,
        is_revoked: key_revoked,
        user_ids: material.users.iter().map(|u| u.id.clone()).collect(),
        capabilities,
        subkeys,
    };

    tracing::debug!(
        kind = %info.kind,
        fingerprint = %info.fingerprint,
        subkeys = info.subkeys.len(),
        "inspected key"
    );
    info
}

fn union_flags(bindings: &[&SignatureRecord]) -> Capabilities {
    let mut caps = Capabilities::empty();
    for sig in bindings {
        if let Some(flags) = sig.key_flags {
            caps.extend(flags);
        }
    }
    caps
}

/// Most recent signature by creation time; on equal times the later one in
/// packet order wins.
fn latest<'a>(bindings: &[&'a SignatureRecord]) -> Option<&'a SignatureRecord> {
    let mut best: Option<&'a SignatureRecord> = None;
    for sig in bindings {
        match best {
            Some(current) if sig.created < current.created => {}
            _ => best = Some(sig),
        }
    }
    best
}

fn expiration(created: DateTime<Utc>, sig: &SignatureRecord) -> Option<DateTime<Utc>> {
    let secs = sig.key_validity_secs.filter(|s| *s > 0)?;
    let validity = chrono::Duration::try_seconds(i64::try_from(secs).ok()?)?;
    created.checked_add_signed(validity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armor::tests::armor;
    use crate::backend::SignedInput;
    use crate::classify::{ErrorKind, FieldTag};
    use crate::material::{KeyComponent, SubkeyMaterial, UserMaterial};
    use crate::types::{Capability, VerificationResult};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zeroize::Zeroizing;

    const FIXTURE_FPR: &str = "0123456789abcdef0123456789abcdef01234567";

    struct StaticBackend {
        material: Option<KeyMaterial>,
        calls: AtomicUsize,
    }

    impl StaticBackend {
        fn new(material: KeyMaterial) -> Self {
            Self {
                material: Some(material),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                material: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CryptoBackend for StaticBackend {
        fn parse_key(&self, _armored: &str) -> Result<KeyMaterial> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.material
                .clone()
                .ok_or_else(|| Error::Parse("unexpected packet tag".to_string()))
        }

        fn encrypt(&self, _: &[u8], _: &[&str]) -> Result<String> {
            unreachable!()
        }

        fn decrypt(&self, _: &str, _: &str, _: Option<&str>) -> Result<Zeroizing<Vec<u8>>> {
            unreachable!()
        }

        fn sign(&self, _: &[u8], _: &str, _: Option<&str>, _: bool) -> Result<String> {
            unreachable!()
        }

        fn verify(&self, _: SignedInput<'_>, _: &str) -> Result<VerificationResult> {
            unreachable!()
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn sig(kind: SignatureKind, day: u32, flags: u8, validity_days: u64) -> SignatureRecord {
        SignatureRecord {
            kind,
            created: Some(at(day)),
            key_flags: Some(Capabilities::from_bitmask(flags)),
            key_validity_secs: Some(validity_days * 86_400),
            valid: true,
        }
    }

    fn component(fpr_hex: &str) -> KeyComponent {
        let fingerprint = hex::decode(fpr_hex).unwrap();
        KeyComponent {
            key_id: fingerprint[fingerprint.len() - 8..].to_vec(),
            fingerprint,
            algorithm: "EdDSA".to_string(),
            curve: Some("ed25519".to_string()),
            bit_size: None,
            created: at(1),
        }
    }

    fn material(user_sigs: Vec<SignatureRecord>) -> KeyMaterial {
        KeyMaterial {
            is_secret: true,
            secret_encrypted: true,
            primary: component(FIXTURE_FPR),
            direct_signatures: vec![],
            users: vec![UserMaterial {
                id: "Alice <alice@example.com>".to_string(),
                signatures: user_sigs,
            }],
            subkeys: vec![],
        }
    }

    fn private_block() -> String {
        armor(BlockKind::PrivateKey, b"opaque packets")
    }

    fn public_block() -> String {
        armor(BlockKind::PublicKey, b"opaque packets")
    }

    #[test]
    fn fixture_fingerprint_and_protection_state() {
        let backend = StaticBackend::new(material(vec![sig(SignatureKind::Certification, 1, 3, 0)]));
        let info = inspect(&backend, &private_block(), &Config::default()).unwrap();

        assert_eq!(info.fingerprint, FIXTURE_FPR);
        assert_eq!(info.key_id, "89abcdef01234567");
        assert_eq!(info.kind, KeyKind::Private);
        assert!(info.is_encrypted);
        assert!(info.needs_passphrase());
        assert_eq!(info.user_ids, vec!["Alice <alice@example.com>".to_string()]);
        assert_eq!(info.expiration_date, None);
        assert!(info.capabilities.contains(Capability::Certify));
        assert!(info.capabilities.contains(Capability::Sign));
    }

    #[test]
    fn inspection_is_deterministic() {
        let backend = StaticBackend::new(material(vec![sig(SignatureKind::Certification, 1, 3, 10)]));
        let text = private_block();
        let first = inspect(&backend, &text, &Config::default()).unwrap();
        let second = inspect(&backend, &text, &Config::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn surrounding_whitespace_is_stripped() {
        let backend = StaticBackend::new(material(vec![]));
        let text = format!("\n\t  {}\n\n  ", private_block());
        assert!(inspect(&backend, &text, &Config::default()).is_ok());
    }

    #[test]
    fn message_block_is_not_a_key() {
        let backend = StaticBackend::new(material(vec![]));
        let err = inspect(
            &backend,
            &armor(BlockKind::Message, b"data"),
            &Config::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidKeyFormat);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bad_checksum_never_reaches_the_backend() {
        let backend = StaticBackend::new(material(vec![]));
        let text = private_block().replace("b3BhcXVl", "b3BhcXVm");
        let err = inspect(&backend, &text, &Config::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidKeyFormat);
        assert_eq!(err.field, FieldTag::PublicKey);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backend_parse_failure_is_invalid_key_format() {
        let backend = StaticBackend::failing();
        let err = inspect(&backend, &public_block(), &Config::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidKeyFormat);
        assert!(err.message.contains("unexpected packet tag"));
    }

    #[test]
    fn label_must_agree_with_material() {
        let backend = StaticBackend::new(material(vec![]));
        let err = inspect(&backend, &public_block(), &Config::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidKeyFormat);

        let mut public = material(vec![]);
        public.is_secret = false;
        let backend = StaticBackend::new(public);
        assert!(inspect(&backend, &private_block(), &Config::default()).is_err());
    }

    #[test]
    fn public_key_is_never_encrypted() {
        let mut public = material(vec![]);
        public.is_secret = false;
        let backend = StaticBackend::new(public);
        let info = inspect(&backend, &public_block(), &Config::default()).unwrap();
        assert_eq!(info.kind, KeyKind::Public);
        assert!(!info.is_encrypted);
        assert!(!info.needs_passphrase());
    }

    #[test]
    fn empty_user_ids_and_subkeys_are_legal() {
        let mut bare = material(vec![]);
        bare.users.clear();
        let backend = StaticBackend::new(bare);
        let info = inspect(&backend, &private_block(), &Config::default()).unwrap();
        assert!(info.user_ids.is_empty());
        assert!(info.subkeys.is_empty());
        assert!(info.capabilities.is_empty());
    }

    #[test]
    fn most_recent_self_signature_sets_expiration() {
        // Packet order: newer signature first, older second.
        let info = derive_key_info(
            KeyKind::Private,
            &material(vec![
                sig(SignatureKind::Certification, 20, 3, 365),
                sig(SignatureKind::Certification, 5, 3, 30),
            ]),
        );
        assert_eq!(info.expiration_date, Some(at(1) + chrono::Duration::days(365)));
    }

    #[test]
    fn equal_creation_times_prefer_later_packet() {
        let info = derive_key_info(
            KeyKind::Private,
            &material(vec![
                sig(SignatureKind::Certification, 5, 3, 30),
                sig(SignatureKind::Certification, 5, 3, 60),
            ]),
        );
        assert_eq!(info.expiration_date, Some(at(1) + chrono::Duration::days(60)));
    }

    #[test]
    fn zero_validity_means_never_expires() {
        let info = derive_key_info(
            KeyKind::Private,
            &material(vec![
                sig(SignatureKind::Certification, 2, 3, 30),
                sig(SignatureKind::Certification, 9, 3, 0),
            ]),
        );
        assert_eq!(info.expiration_date, None);
    }

    #[test]
    fn invalid_signatures_are_ignored() {
        let mut forged = sig(SignatureKind::Certification, 30, 0x0F, 1);
        forged.valid = false;
        let info = derive_key_info(
            KeyKind::Private,
            &material(vec![sig(SignatureKind::Certification, 2, 1, 0), forged]),
        );
        assert_eq!(info.capabilities.tags(), vec!["certify"]);
        assert_eq!(info.expiration_date, None);
    }

    #[test]
    fn revoked_user_id_bindings_are_excluded() {
        let mut key = material(vec![sig(SignatureKind::Certification, 2, 1, 0)]);
        key.users.push(UserMaterial {
            id: "Old <old@example.com>".to_string(),
            signatures: vec![
                sig(SignatureKind::Certification, 3, 4, 0),
                sig(SignatureKind::CertificationRevocation, 4, 0, 0),
                // Re-certified after the revocation: still excluded.
                sig(SignatureKind::Certification, 5, 4, 0),
            ],
        });
        let info = derive_key_info(KeyKind::Private, &key);
        assert!(info.capabilities.contains(Capability::Certify));
        assert!(!info.capabilities.contains(Capability::Encrypt));
        assert_eq!(info.user_ids.len(), 2);
    }

    #[test]
    fn key_revocation_removes_primary_capabilities() {
        let mut key = material(vec![sig(SignatureKind::Certification, 2, 3, 90)]);
        key.direct_signatures
            .push(sig(SignatureKind::KeyRevocation, 10, 0, 0));
        let info = derive_key_info(KeyKind::Private, &key);
        assert!(info.is_revoked);
        assert!(info.capabilities.is_empty());
        assert_eq!(info.expiration_date, Some(at(1) + chrono::Duration::days(90)));
    }

    #[test]
    fn direct_key_signature_contributes_flags() {
        let mut key = material(vec![sig(SignatureKind::Certification, 2, 1, 0)]);
        key.direct_signatures
            .push(sig(SignatureKind::DirectKey, 3, 8, 0));
        let info = derive_key_info(KeyKind::Private, &key);
        assert_eq!(info.capabilities.tags(), vec!["certify", "authenticate"]);
    }

    #[test]
    fn subkey_revocation_is_terminal() {
        let mut key = material(vec![sig(SignatureKind::Certification, 2, 3, 0)]);
        key.subkeys.push(SubkeyMaterial {
            component: component("ffeeddccbbaa99887766554433221100ffeeddcc"),
            signatures: vec![
                sig(SignatureKind::SubkeyBinding, 2, 4, 0),
                sig(SignatureKind::SubkeyRevocation, 3, 0, 0),
                sig(SignatureKind::SubkeyBinding, 4, 4, 0),
            ],
        });
        key.subkeys.push(SubkeyMaterial {
            component: component("00112233445566778899aabbccddeeff00112233"),
            signatures: vec![sig(SignatureKind::SubkeyBinding, 2, 2, 10)],
        });

        let info = derive_key_info(KeyKind::Private, &key);
        assert_eq!(info.subkeys.len(), 2);

        let revoked = &info.subkeys[0];
        assert!(revoked.is_revoked);
        assert!(revoked.capabilities.is_empty());
        assert_eq!(revoked.key_id, "33221100ffeeddcc");

        let signing = &info.subkeys[1];
        assert!(!signing.is_revoked);
        assert_eq!(signing.capabilities.tags(), vec!["sign"]);
        assert_eq!(signing.expiration_date, Some(at(1) + chrono::Duration::days(10)));
        assert!(info.can_sign());
        assert!(!info.can_encrypt());
    }

    #[test]
    fn subkey_expiration_is_independent_of_primary() {
        let mut key = material(vec![sig(SignatureKind::Certification, 2, 3, 5)]);
        key.subkeys.push(SubkeyMaterial {
            component: component("00112233445566778899aabbccddeeff00112233"),
            signatures: vec![sig(SignatureKind::SubkeyBinding, 2, 4, 0)],
        });
        let info = derive_key_info(KeyKind::Private, &key);
        assert!(info.expiration_date.is_some());
        assert_eq!(info.subkeys[0].expiration_date, None);
    }

    #[test]
    fn oversized_input_is_rejected_before_parsing() {
        let backend = StaticBackend::new(material(vec![]));
        let config = Config {
            max_input_bytes: 16,
            ..Config::default()
        };
        assert!(inspect(&backend, &private_block(), &config).is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_text(text in "\\PC{0,300}") {
            let backend = StaticBackend::failing();
            let result = inspect(&backend, &text, &Config::default());
            prop_assert!(result.is_err());
        }

        #[test]
        fn fingerprint_is_fixed_length_lowercase_hex(bytes in proptest::collection::vec(any::<u8>(), 20..=20)) {
            let mut key = material(vec![]);
            key.primary.fingerprint = bytes;
            let info = derive_key_info(KeyKind::Private, &key);
            prop_assert_eq!(info.fingerprint.len(), 40);
            prop_assert!(info.fingerprint.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }
}
