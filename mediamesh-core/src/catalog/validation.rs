//! Local checks applied to entries before they are published.

use rand::Rng;

use super::entry::CatalogEntry;
use crate::reference::{MagnetLink, is_content_address};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Shortest title accepted for publishing, in characters.
pub const MIN_TITLE_CHARS: usize = 3;

/// Entry rejected before any network action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Title must be at least {min} characters")]
    TitleTooShort { min: usize },

    #[error("Invalid magnet URI: {reason}")]
    InvalidMagnet { reason: String },

    #[error("Invalid content address: {value}")]
    InvalidContentAddress { value: String },

    #[error("Invalid URL in {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

/// Checks every field a publisher is responsible for.
///
/// # Errors
/// - `ValidationError::MissingField` - Empty id, title, or reference field
/// - `ValidationError::TitleTooShort` - Title under `MIN_TITLE_CHARS` characters
/// - `ValidationError::InvalidMagnet` - Primary reference is not a btih magnet
/// - `ValidationError::InvalidContentAddress` - Content address matches no CID encoding
/// - `ValidationError::InvalidUrl` - Fallback or thumbnail URL is not http(s)
pub fn validate_entry(entry: &CatalogEntry) -> Result<(), ValidationError> {
    require(&entry.id, "id")?;
    require(&entry.title, "title")?;
    require(&entry.primary_reference, "primaryReference")?;
    require(&entry.content_address, "contentAddress")?;

    if entry.title.trim().chars().count() < MIN_TITLE_CHARS {
        return Err(ValidationError::TitleTooShort {
            min: MIN_TITLE_CHARS,
        });
    }

    MagnetLink::parse(&entry.primary_reference).map_err(|e| ValidationError::InvalidMagnet {
        reason: e.to_string(),
    })?;

    if !is_content_address(&entry.content_address) {
        return Err(ValidationError::InvalidContentAddress {
            value: entry.content_address.clone(),
        });
    }

    if let Some(url) = &entry.fallback_url {
        validate_http_url(url, "fallbackURL")?;
    }
    if let Some(url) = &entry.thumbnail_url {
        validate_http_url(url, "thumbnailURL")?;
    }

    Ok(())
}

/// Parses `value` as an absolute http or https URL.
///
/// # Errors
/// - `ValidationError::InvalidUrl` - Unparsable URL or a non-http scheme
pub fn validate_http_url(value: &str, field: &'static str) -> Result<url::Url, ValidationError> {
    let url = url::Url::parse(value).map_err(|e| ValidationError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ValidationError::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Trims free text and caps it at `max_len` characters.
pub fn sanitize_text(input: &str, max_len: usize) -> String {
    input.trim().chars().take(max_len).collect()
}

/// Applies `sanitize_text` to every free-text field; blank optional fields
/// become `None`.
pub fn sanitize_entry(mut entry: CatalogEntry, max_len: usize) -> CatalogEntry {
    let optional = |value: Option<String>| {
        value
            .map(|v| sanitize_text(&v, max_len))
            .filter(|v| !v.is_empty())
    };

    entry.id = entry.id.trim().to_string();
    entry.title = sanitize_text(&entry.title, max_len);
    entry.description = optional(entry.description);
    entry.category = optional(entry.category);
    entry.primary_reference = entry.primary_reference.trim().to_string();
    entry.content_address = entry.content_address.trim().to_string();
    entry.fallback_url = optional(entry.fallback_url);
    entry.thumbnail_url = optional(entry.thumbnail_url);
    entry.added_by = optional(entry.added_by);
    entry
}

/// Generates a publisher-side entry id: `media_<millis>_<9 base36 chars>`.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("media_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MediaKind;

    fn valid_entry() -> CatalogEntry {
        CatalogEntry::new(
            "media_1",
            "Sintel",
            "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10&dn=Sintel",
            "QmQc6vqZAnpUfTy7FW9zqXd9RCqLdCU7GqQN1GE5LqAqBb",
            MediaKind::Video,
        )
    }

    #[test]
    fn test_valid_entry_passes() {
        let entry = valid_entry()
            .with_fallback_url("https://download.blender.org/demo/movies/Sintel.2010.720p.mkv");
        assert_eq!(validate_entry(&entry), Ok(()));
    }

    #[test]
    fn test_missing_fields_are_named() {
        let mut entry = valid_entry();
        entry.title = "   ".to_string();
        assert_eq!(
            validate_entry(&entry),
            Err(ValidationError::MissingField { field: "title" })
        );

        let mut entry = valid_entry();
        entry.primary_reference.clear();
        assert_eq!(
            validate_entry(&entry),
            Err(ValidationError::MissingField {
                field: "primaryReference"
            })
        );
    }

    #[test]
    fn test_title_needs_three_characters() {
        let mut entry = valid_entry();
        entry.title = "Up".to_string();
        assert_eq!(
            validate_entry(&entry),
            Err(ValidationError::TitleTooShort { min: 3 })
        );

        entry.title = "Up!".to_string();
        assert_eq!(validate_entry(&entry), Ok(()));

        // Counted in characters, not bytes.
        entry.title = "東京".to_string();
        assert!(validate_entry(&entry).is_err());
        entry.title = "東京都".to_string();
        assert_eq!(validate_entry(&entry), Ok(()));
    }

    #[test]
    fn test_base32_magnet_accepted() {
        let mut entry = valid_entry();
        entry.primary_reference =
            "magnet:?xt=urn:btih:BCW2LJ5GDA5K4HQJ3AY56Z2I2VTASWQQ&dn=Sintel".to_string();
        assert_eq!(validate_entry(&entry), Ok(()));
    }

    #[test]
    fn test_malformed_references_rejected() {
        let mut entry = valid_entry();
        entry.primary_reference = "p2p://abc".to_string();
        assert!(matches!(
            validate_entry(&entry),
            Err(ValidationError::InvalidMagnet { .. })
        ));

        let mut entry = valid_entry();
        entry.content_address = "cid123".to_string();
        assert!(matches!(
            validate_entry(&entry),
            Err(ValidationError::InvalidContentAddress { .. })
        ));
    }

    #[test]
    fn test_non_http_fallback_rejected() {
        let entry = valid_entry().with_fallback_url("ftp://origin/x.mp4");
        assert!(matches!(
            validate_entry(&entry),
            Err(ValidationError::InvalidUrl {
                field: "fallbackURL",
                ..
            })
        ));
    }

    #[test]
    fn test_sanitize_trims_and_caps() {
        assert_eq!(sanitize_text("  hello  ", 500), "hello");
        assert_eq!(sanitize_text(&"x".repeat(600), 500).len(), 500);

        let entry = sanitize_entry(valid_entry().with_description("   "), 500);
        assert_eq!(entry.description, None);
    }

    #[test]
    fn test_generated_ids_are_unique_and_shaped() {
        let first = generate_id();
        let second = generate_id();
        assert_ne!(first, second);
        assert!(first.starts_with("media_"));
        let suffix = first.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
