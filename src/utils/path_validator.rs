use crate::error::{MsiverError, Result};
use std::path::{Path, PathBuf};

const FORBIDDEN: &[&str] = &["/etc", "/sys", "/proc", "/dev", "/boot"];

/// Provides path validation for the files the tool reads and rewrites.
pub struct PathValidator;

impl PathValidator {
    /// Validates and canonicalises the path of an installer database.
    pub fn validate_database_path(path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();

        if path.as_os_str().is_empty() {
            return Err(MsiverError::InvalidInput(
                "MSI file path was not provided".to_string(),
            ));
        }

        Self::validate_regular_file(path, "MSI file")
    }

    /// Validates a manifest path supplied on the command line.
    pub fn validate_manifest_path(path: impl AsRef<Path>) -> Result<PathBuf> {
        Self::validate_regular_file(path.as_ref(), "Manifest")
    }

    fn validate_regular_file(path: &Path, label: &str) -> Result<PathBuf> {
        let canonical = path.canonicalize().map_err(|e| {
            MsiverError::InvalidInput(format!("{} '{}' not found: {e}", label, path.display()))
        })?;

        if !canonical.is_file() {
            return Err(MsiverError::InvalidInput(format!(
                "{} '{}' is not a file",
                label,
                canonical.display()
            )));
        }

        for forbidden in FORBIDDEN {
            let forbidden_path = Path::new(forbidden);

            if path.starts_with(forbidden_path) || canonical.starts_with(forbidden_path) {
                return Err(MsiverError::InvalidInput(format!(
                    "Access to system directory '{}' is not allowed",
                    forbidden
                )));
            }

            if let Ok(canonical_forbidden) = forbidden_path.canonicalize() {
                if canonical.starts_with(&canonical_forbidden) {
                    return Err(MsiverError::InvalidInput(format!(
                        "Access to system directory '{}' is not allowed",
                        forbidden
                    )));
                }
            }
        }

        Ok(canonical)
    }
}
