//! Reference formats carried by catalog entries.
//!
//! A catalog entry points at its media three ways: a magnet URI for the P2P
//! swarm, a content-addressed identifier for gateway retrieval, and an
//! optional plain origin URL. This module parses and checks the first two.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

/// CIDv0 (`Qm` + base58) or CIDv1 (`b` + base32), matched case-insensitively.
static CONTENT_ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(Qm[1-9A-HJ-NP-Za-km-z]{44}|b[a-z2-7]{58})$")
        .expect("content address pattern is a valid regex")
});

const BTIH_PREFIX: &str = "xt=urn:btih:";

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary, carried hex-encoded in the
/// `xt=urn:btih:` parameter of a magnet URI (hex or base32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for InfoHash {
    type Err = ReferenceError;

    /// Accepts the 40-character hex form or the 32-character base32 form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            40 => {
                let mut hash = [0u8; 20];
                hex::decode_to_slice(s, &mut hash).map_err(|e| ReferenceError::InvalidMagnet {
                    reason: format!("info hash is not hex: {e}"),
                })?;
                Ok(Self(hash))
            }
            32 => decode_base32_hash(s).map(Self),
            other => Err(ReferenceError::InvalidMagnet {
                reason: format!("info hash has length {other} (expected 40 hex or 32 base32)"),
            }),
        }
    }
}

/// Decodes an RFC 4648 base32 info hash (no padding, any case).
fn decode_base32_hash(s: &str) -> Result<[u8; 20], ReferenceError> {
    let mut hash = [0u8; 20];
    let mut buffer: u32 = 0;
    let mut bits = 0;
    let mut written = 0;

    for c in s.bytes() {
        let value = match c.to_ascii_uppercase() {
            upper @ b'A'..=b'Z' => upper - b'A',
            digit @ b'2'..=b'7' => digit - b'2' + 26,
            _ => {
                return Err(ReferenceError::InvalidMagnet {
                    reason: format!("info hash is not base32: unexpected '{}'", c as char),
                });
            }
        };

        buffer = (buffer << 5) | u32::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            hash[written] = (buffer >> bits) as u8;
            written += 1;
            buffer &= (1 << bits) - 1;
        }
    }

    Ok(hash)
}

/// Parsed magnet URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
    /// The URI as published, kept for handing to torrent clients verbatim
    pub uri: String,
}

impl MagnetLink {
    /// Parses a magnet URI and extracts its BitTorrent info hash.
    ///
    /// # Errors
    /// - `ReferenceError::InvalidMagnet` - Wrong scheme, malformed URI, or a
    ///   missing or undecodable `urn:btih` topic
    pub fn parse(uri: &str) -> Result<Self, ReferenceError> {
        let uri = uri.trim();
        if !uri.starts_with("magnet:?") {
            return Err(ReferenceError::InvalidMagnet {
                reason: "expected a magnet:? URI".to_string(),
            });
        }

        let info_hash = Self::extract_info_hash(uri)?;

        let magnet = magnet_url::Magnet::new(uri).map_err(|e| ReferenceError::InvalidMagnet {
            reason: format!("{e}"),
        })?;

        Ok(Self {
            info_hash,
            display_name: magnet.display_name().map(|s| s.to_string()),
            trackers: magnet.trackers().to_vec(),
            uri: uri.to_string(),
        })
    }

    fn extract_info_hash(uri: &str) -> Result<InfoHash, ReferenceError> {
        let query = uri.split_once('?').map(|(_, query)| query).unwrap_or("");

        query
            .split('&')
            .find_map(|param| param.strip_prefix(BTIH_PREFIX))
            .ok_or_else(|| ReferenceError::InvalidMagnet {
                reason: "missing xt=urn:btih topic".to_string(),
            })?
            .to_ascii_lowercase()
            .parse()
    }
}

/// Returns true if `value` is a CIDv0 or base32 CIDv1 string.
pub fn is_content_address(value: &str) -> bool {
    CONTENT_ADDRESS_PATTERN.is_match(value)
}

/// Errors raised while parsing entry references.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("Invalid magnet URI: {reason}")]
    InvalidMagnet { reason: String },

    #[error("Invalid content address: {value}")]
    InvalidContentAddress { value: String },
}
