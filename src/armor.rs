//! ASCII armor framing.
//!
//! This module checks the framing of armored input before it is handed to
//! a crypto backend. Decoding is rpgp's [`Dearmor`]; on top of it the input
//! must hold exactly one block of a kind this crate handles, and a present
//! CRC-24 line must match the body. It never rewrites its input; the text
//! given to the backend is the text the user supplied.

use std::io::Read;

use pgp::armor::{ArmorCrc24Status, Dearmor};
use thiserror::Error;

const SIGNATURE_BEGIN: &str = "\n-----BEGIN PGP SIGNATURE-----";

/// The kind of armor block, from its BEGIN label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// `PGP PUBLIC KEY BLOCK`
    PublicKey,
    /// `PGP PRIVATE KEY BLOCK`
    PrivateKey,
    /// `PGP MESSAGE` (encrypted or inline-signed)
    Message,
    /// `PGP SIGNED MESSAGE` (cleartext signature framework)
    SignedMessage,
    /// `PGP SIGNATURE` (detached signature)
    Signature,
}

impl BlockKind {
    /// The label used in the BEGIN/END lines.
    pub fn label(&self) -> &'static str {
        match self {
            BlockKind::PublicKey => "PGP PUBLIC KEY BLOCK",
            BlockKind::PrivateKey => "PGP PRIVATE KEY BLOCK",
            BlockKind::Message => "PGP MESSAGE",
            BlockKind::SignedMessage => "PGP SIGNED MESSAGE",
            BlockKind::Signature => "PGP SIGNATURE",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "PGP PUBLIC KEY BLOCK" => Some(BlockKind::PublicKey),
            "PGP PRIVATE KEY BLOCK" => Some(BlockKind::PrivateKey),
            "PGP MESSAGE" => Some(BlockKind::Message),
            "PGP SIGNED MESSAGE" => Some(BlockKind::SignedMessage),
            "PGP SIGNATURE" => Some(BlockKind::Signature),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Armor framing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArmorError {
    /// No BEGIN line at the start of the input
    #[error("no OpenPGP armor block found")]
    NoBlock,

    /// The BEGIN line names a label this crate does not handle
    #[error("unknown armor label \"{0}\"")]
    UnknownLabel(String),

    /// rpgp rejected the framing: headers, base64 body or END line
    #[error("{0}")]
    Malformed(String),

    /// More than one armor block in a single input
    #[error("expected a single armor block, found another after it")]
    MultipleBlocks,

    /// Text after the armor block
    #[error("unexpected text outside the armor block")]
    UnexpectedText,

    /// The body decodes to nothing
    #[error("armor body is empty")]
    EmptyBody,

    /// The CRC-24 line does not match the body
    #[error("armor checksum mismatch")]
    ChecksumMismatch,

    /// No CRC-24 line and the configuration requires one
    #[error("armor checksum line is missing")]
    MissingChecksum,

    /// A cleartext signed message without its signature block
    #[error("signed message has no signature block")]
    MissingSignature,
}

/// Check input that must hold exactly one armor block and return its kind.
///
/// Leading and trailing whitespace is ignored. A cleartext signed message
/// counts as one block: its trailing signature block is part of it.
pub fn check_single(text: &str, require_checksum: bool) -> Result<BlockKind, ArmorError> {
    let text = text.trim();
    let kind = peek_kind(text)?;

    if kind == BlockKind::SignedMessage {
        check_cleartext(text, require_checksum)?;
    } else {
        let rest = dearmor(text, require_checksum)?;
        ensure_nothing_after(&rest)?;
    }
    Ok(kind)
}

/// Determine the block kind of the first armor line without decoding.
pub fn peek_kind(text: &str) -> Result<BlockKind, ArmorError> {
    let first = text.trim().lines().next().ok_or(ArmorError::NoBlock)?;
    parse_begin(first)
}

/// Split input holding several concatenated armor blocks.
///
/// Returns each block's text (BEGIN to END line, inclusive). Text between
/// blocks is dropped. Framing inside each block is not checked here.
pub fn split_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut start: Option<(usize, String)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        match &start {
            None => {
                if let Ok(kind) = parse_begin(trimmed) {
                    start = Some((offset, format!("-----END {}-----", kind.label())));
                }
            }
            Some((begin, end_line)) => {
                if trimmed == end_line {
                    blocks.push(&text[*begin..offset + trimmed.len()]);
                    start = None;
                }
            }
        }
        offset += line.len();
    }

    blocks
}

fn parse_begin(line: &str) -> Result<BlockKind, ArmorError> {
    let label = line
        .trim_end()
        .strip_prefix("-----BEGIN ")
        .and_then(|rest| rest.strip_suffix("-----"))
        .ok_or(ArmorError::NoBlock)?;
    BlockKind::from_label(label).ok_or_else(|| ArmorError::UnknownLabel(label.to_string()))
}

/// Decode one block with rpgp and check its checksum. Returns whatever
/// follows the END line.
fn dearmor(text: &str, require_checksum: bool) -> Result<String, ArmorError> {
    let mut dearmor = Dearmor::new(text.as_bytes());
    let mut body = Vec::new();
    dearmor
        .read_to_end(&mut body)
        .map_err(|e| ArmorError::Malformed(e.to_string()))?;
    if body.is_empty() {
        return Err(ArmorError::EmptyBody);
    }

    match dearmor.crc24_status() {
        ArmorCrc24Status::Unchecked { footer_crc } if footer_crc != crc24::hash_raw(&body) => {
            return Err(ArmorError::ChecksumMismatch)
        }
        ArmorCrc24Status::NoCrc24 if require_checksum => return Err(ArmorError::MissingChecksum),
        _ => {}
    }

    let (_typ, _headers, _checksum, mut rest) = dearmor.into_parts();
    let mut trailing = String::new();
    rest.read_to_string(&mut trailing)
        .map_err(|_| ArmorError::UnexpectedText)?;
    Ok(trailing)
}

fn ensure_nothing_after(rest: &str) -> Result<(), ArmorError> {
    match rest.trim().lines().next() {
        None => Ok(()),
        Some(line) if parse_begin(line).is_ok() => Err(ArmorError::MultipleBlocks),
        Some(_) => Err(ArmorError::UnexpectedText),
    }
}

/// Cleartext signature framework: hash headers, blank line, dash-escaped
/// text, then a `PGP SIGNATURE` block running to the end of the input.
fn check_cleartext(text: &str, require_checksum: bool) -> Result<(), ArmorError> {
    // Dash escaping keeps "-----BEGIN" out of the start of text lines.
    let signature = text
        .find(SIGNATURE_BEGIN)
        .map(|at| &text[at + 1..])
        .ok_or(ArmorError::MissingSignature)?;
    let rest = dearmor(signature, require_checksum)?;
    ensure_nothing_after(&rest)
}
