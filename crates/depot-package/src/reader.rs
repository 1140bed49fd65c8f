//! Archive reader: extracts a [`PackageManifest`] from a package archive.
//!
//! Package archives are zip files carrying a `manifest.json` entry at the
//! root. The reader classifies failures into transient open errors (file
//! still being written or locked by an external writer) and fatal format
//! errors; see [`PackageError`] for how the cache reacts to each.

use std::{
    fs::File,
    io::{BufReader, Cursor, Read, Seek},
    path::{Path, PathBuf},
};

use zip::{result::ZipError, ZipArchive};

use crate::{
    error::{PackageError, Result},
    manifest::PackageManifest,
};

/// Name of the manifest entry inside a package archive.
pub const MANIFEST_NAME: &str = "manifest.json";

fn zip_error(path: &Path, err: ZipError) -> PackageError {
    match err {
        // A torn read usually means the archive is mid-upload.
        ZipError::Io(source) => PackageError::RecoverableOpen {
            path: path.to_path_buf(),
            source,
        },
        other => PackageError::InvalidArchive {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

fn read_manifest<R: Read + Seek>(path: &Path, reader: R) -> Result<PackageManifest> {
    let mut archive = ZipArchive::new(reader).map_err(|err| zip_error(path, err))?;
    let entry = match archive.by_name(MANIFEST_NAME) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(PackageError::MissingManifest {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(zip_error(path, err)),
    };
    let manifest: PackageManifest =
        serde_json::from_reader(entry).map_err(|err| match err.classify() {
            serde_json::error::Category::Io => PackageError::RecoverableOpen {
                path: path.to_path_buf(),
                source: std::io::Error::other(err),
            },
            _ => PackageError::InvalidManifest {
                path: path.to_path_buf(),
                source: err,
            },
        })?;
    manifest.validate()?;
    Ok(manifest)
}

/// Reads the manifest out of a package archive on disk.
///
/// The publish timestamp falls back to the file's modification time when
/// the manifest does not declare one.
///
/// # Errors
///
/// * [`PackageError::RecoverableOpen`] when the file cannot be read right
///   now; the caller skips it for this pass.
/// * Fatal format variants when the archive or its manifest is malformed.
pub fn read_package<P: AsRef<Path>>(path: P) -> Result<PackageManifest> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| PackageError::RecoverableOpen {
        path: path.to_path_buf(),
        source: err,
    })?;
    let mut manifest = read_manifest(path, BufReader::new(file))?;
    if manifest.published.is_none() {
        manifest.published = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(Into::into);
    }
    Ok(manifest)
}

/// Reads the manifest out of an archive held in memory.
///
/// Used on push, before the uploaded bytes are given a name on disk. All
/// failures are fatal here: there is no external writer to wait out.
pub fn read_manifest_bytes(bytes: &[u8]) -> Result<PackageManifest> {
    read_manifest(&PathBuf::from("<upload>"), Cursor::new(bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn archive_bytes(manifest_json: Option<&str>) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            if let Some(json) = manifest_json {
                writer.start_file(MANIFEST_NAME, options).unwrap();
                writer.write_all(json.as_bytes()).unwrap();
            }
            writer.start_file("content/data.bin", options).unwrap();
            writer.write_all(b"payload").unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_read_package_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Foo.1.0.0.dpk");
        std::fs::write(
            &path,
            archive_bytes(Some(r#"{"id": "Foo", "version": "1.0.0"}"#)),
        )
        .unwrap();

        let manifest = read_package(&path).unwrap();
        assert_eq!(manifest.id, "Foo");
        assert_eq!(manifest.version.to_string(), "1.0.0");
        // Falls back to the file's mtime.
        assert!(manifest.published.is_some());
    }

    #[test]
    fn test_missing_file_is_recoverable() {
        let err = read_package("/nonexistent/Foo.1.0.0.dpk").unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_not_a_zip_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.dpk");
        std::fs::write(&path, b"this is not a zip archive").unwrap();
        let err = read_package(&path).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(matches!(err, PackageError::InvalidArchive { .. }));
    }

    #[test]
    fn test_missing_manifest_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.dpk");
        std::fs::write(&path, archive_bytes(None)).unwrap();
        let err = read_package(&path).unwrap_err();
        assert!(matches!(err, PackageError::MissingManifest { .. }));
    }

    #[test]
    fn test_malformed_manifest_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.dpk");
        std::fs::write(&path, archive_bytes(Some(r#"{"id": }"#))).unwrap();
        let err = read_package(&path).unwrap_err();
        assert!(matches!(err, PackageError::InvalidManifest { .. }));
    }

    #[test]
    fn test_read_manifest_bytes() {
        let bytes = archive_bytes(Some(r#"{"id": "Push", "version": "0.3.1-rc.2"}"#));
        let manifest = read_manifest_bytes(&bytes).unwrap();
        assert_eq!(manifest.id, "Push");
        assert!(!manifest.is_release());
        // No file behind it, so no timestamp fallback.
        assert!(manifest.published.is_none());
    }

    #[test]
    fn test_bad_id_is_rejected() {
        let bytes = archive_bytes(Some(r#"{"id": "../escape", "version": "1.0.0"}"#));
        let err = read_manifest_bytes(&bytes).unwrap_err();
        assert!(matches!(err, PackageError::InvalidId(_)));
    }
}
