//! Input validation for documents handed to ingestion.
//!
//! pdfium produces opaque errors for files that are missing, unreadable or
//! not PDFs at all. Checking existence, read permission and the `%PDF` magic
//! bytes up front turns those into precise [`QaError`] variants.

use crate::error::QaError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate a local PDF path and return it as an owned `PathBuf`.
pub fn validate_pdf(path: impl AsRef<Path>) -> Result<PathBuf, QaError> {
    let path = path.as_ref().to_path_buf();

    if !path.is_file() {
        return Err(QaError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(QaError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(QaError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(QaError::FileNotFound { path });
        }
    }

    debug!("Validated PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_not_found() {
        let err = validate_pdf("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, QaError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04 zip archive").unwrap();
        match validate_pdf(f.path()).unwrap_err() {
            QaError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn short_file_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%P").unwrap();
        assert!(matches!(
            validate_pdf(f.path()),
            Err(QaError::NotAPdf { .. })
        ));
    }

    #[test]
    fn pdf_magic_is_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        assert_eq!(validate_pdf(f.path()).unwrap(), f.path());
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_pdf(dir.path()),
            Err(QaError::FileNotFound { .. })
        ));
    }
}
