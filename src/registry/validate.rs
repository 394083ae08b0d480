//! Mapping validation.

use url::Url;

use crate::error::RegistryError;

/// Validate a prefix/target pair before it reaches the KV store.
///
/// Prefixes are literal path fragments: non-empty, leading `/`, no
/// whitespace. Targets must parse as absolute `http`/`https` URLs with a
/// host.
pub fn validate_mapping(prefix: &str, target: &str) -> Result<(), RegistryError> {
    if prefix.is_empty() {
        return Err(RegistryError::Validation("prefix cannot be empty".into()));
    }
    if !prefix.starts_with('/') {
        return Err(RegistryError::Validation("prefix must start with /".into()));
    }
    if prefix.contains(char::is_whitespace) {
        return Err(RegistryError::Validation(
            "prefix cannot contain whitespace".into(),
        ));
    }

    if target.is_empty() {
        return Err(RegistryError::Validation("target URL cannot be empty".into()));
    }
    let parsed = Url::parse(target)
        .map_err(|e| RegistryError::Validation(format!("invalid target URL: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(RegistryError::Validation(
            "target URL must use http or https scheme".into(),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(RegistryError::Validation(
            "target URL must have a valid host".into(),
        ));
    }

    Ok(())
}
