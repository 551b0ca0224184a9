//! Compose manifest parser.
//!
//! Parses manifest files and performs structural validation. Content
//! validation that needs flags or the filesystem lives in the converter.

use super::types::*;
use crate::error::{Result, StackError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Parser for compose manifests.
pub struct ComposeParser;

impl ComposeParser {
    /// Parse a manifest from a string.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the YAML is invalid, the version is
    /// unsupported, no services are defined, or a service names no image.
    pub fn parse(content: &str) -> Result<ComposeFile> {
        let compose: ComposeFile = serde_yaml::from_str(content)
            .map_err(|e| StackError::ManifestParse { reason: e.to_string() })?;

        Self::validate_version(&compose.version)?;
        Self::validate_services(&compose.services)?;

        Ok(compose)
    }

    /// Parse a manifest from a file path.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ComposeFile> {
        let path = path.as_ref();
        info!(path = %path.display(), "reading manifest");

        let content = std::fs::read_to_string(path).map_err(|e| StackError::ManifestRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content)
    }

    /// Compose format versions 2 and 3 are supported; an absent version is
    /// treated as the current format.
    fn validate_version(version: &str) -> Result<()> {
        if version.is_empty() || version.starts_with('2') || version.starts_with('3') {
            Ok(())
        } else {
            Err(StackError::Validation {
                reason: format!("unsupported compose version '{}'", version),
            })
        }
    }

    fn validate_services(services: &BTreeMap<String, Service>) -> Result<()> {
        if services.is_empty() {
            return Err(StackError::Validation { reason: "no services defined".to_string() });
        }

        for (name, service) in services {
            if service.image.is_empty() {
                return Err(StackError::Validation {
                    reason: format!("service '{}' has no image", name),
                });
            }
        }

        Ok(())
    }
}
