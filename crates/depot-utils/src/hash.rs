use std::{io::Read, path::Path};

use crate::error::{HashError, HashResult};

/// Calculates the content hash of a file.
///
/// Reads the file through a memory map and returns the blake3 digest as a
/// hex-encoded string.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
pub fn hash_file<P: AsRef<Path>>(file_path: P) -> HashResult<String> {
    let file_path = file_path.as_ref();
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_mmap(file_path)
        .map_err(|err| HashError::ReadFailed {
            path: file_path.to_path_buf(),
            source: err,
        })?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Calculates the blake3 digest of a stream, returning it hex-encoded
/// together with the number of bytes consumed.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if reading the stream fails. The reported
///   path is empty since the source is an arbitrary reader.
pub fn hash_reader<R: Read>(mut reader: R) -> HashResult<(u64, String)> {
    let mut hasher = blake3::Hasher::new();
    let len = std::io::copy(&mut reader, &mut hasher).map_err(|err| HashError::ReadFailed {
        path: Default::default(),
        source: err,
    })?;
    Ok((len, hasher.finalize().to_hex().to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::{hash_file, hash_reader};

    const HELLO_DIGEST: &str = "dc5a4edb8240b018124052c330270696f96771a63b45250a5c17d3000e823355";

    #[test]
    fn test_hash_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();
        let digest = hash_file(file.path()).unwrap();
        assert_eq!(digest, HELLO_DIGEST);
    }

    #[test]
    fn test_hash_reader_matches_hash_file() {
        let digest = hash_reader(&b"hello world\n"[..]).unwrap();
        assert_eq!(digest, (12, HELLO_DIGEST.to_string()));
    }

    #[test]
    fn test_hash_file_not_found() {
        assert!(hash_file("/path/to/nonexistent/file").is_err());
    }
}
