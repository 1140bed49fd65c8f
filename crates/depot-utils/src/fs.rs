use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::error::{FileSystemError, FileSystemResult};

/// Suffix of the sibling marker that flags an archive as hidden.
///
/// Unix has no hidden file attribute, so visibility is tracked with a
/// zero-byte marker next to the archive. The archive bytes and its file
/// name stay untouched, which keeps previously computed content hashes
/// valid for hidden files.
const HIDDEN_MARKER_SUFFIX: &str = ".delisted";

/// File metadata snapshot used when deriving package attributes.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub len: u64,
    pub created: SystemTime,
    pub modified: SystemTime,
}

/// Filesystem surface consumed by the package cache.
///
/// All paths are interpreted relative to the provider's root unless they
/// are already absolute. The package folder is owned by external writers
/// too, so every operation takes the filesystem as the source of truth and
/// reports failures instead of assuming state.
pub trait FileSystemProvider {
    /// The folder this provider serves.
    fn root(&self) -> &Path;

    /// Resolves a path against the root. Absolute paths pass through.
    fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }

    /// Returns the path relative to the root.
    ///
    /// # Errors
    ///
    /// Returns [`FileSystemError::OutsideRoot`] if the path does not live
    /// under the root.
    fn relative<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<PathBuf> {
        let path = path.as_ref();
        if path.is_absolute() {
            path.strip_prefix(self.root())
                .map(Path::to_path_buf)
                .map_err(|_| FileSystemError::OutsideRoot {
                    path: path.to_path_buf(),
                })
        } else {
            Ok(path.to_path_buf())
        }
    }

    /// Lists files with the given extension under the root, recursively.
    ///
    /// When `subdirs` is given, only those immediate subdirectories of the
    /// root are scanned; missing entries in the list are skipped silently.
    /// Returned paths are absolute and sorted for deterministic passes.
    fn list_files(&self, extension: &str, subdirs: Option<&[String]>)
        -> FileSystemResult<Vec<PathBuf>>;

    /// Opens a file for streaming read.
    fn open_file<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<File>;

    /// Whether a file exists at the given path.
    fn file_exists<P: AsRef<Path>>(&self, path: P) -> bool;

    /// Size and timestamps for a file.
    fn stat<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<FileStat>;

    /// Writes a new file from a byte buffer, creating parent directories.
    fn add_file<P: AsRef<Path>>(&self, path: P, contents: &[u8]) -> FileSystemResult<()>;

    /// Deletes a file, together with its hidden marker if one exists.
    fn delete_file<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()>;

    /// Marks a file as hidden or visible.
    fn set_hidden<P: AsRef<Path>>(&self, path: P, hidden: bool) -> FileSystemResult<()>;

    /// Whether the file carries the hidden marker.
    fn is_hidden<P: AsRef<Path>>(&self, path: P) -> bool;
}

/// [`FileSystemProvider`] backed by `std::fs`, rooted at a package folder.
#[derive(Debug, Clone)]
pub struct StandardFileSystemProvider {
    root: PathBuf,
}

impl StandardFileSystemProvider {
    /// Creates a provider rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// * [`FileSystemError::Directory`] if the root cannot be created.
    /// * [`FileSystemError::NotADirectory`] if the path exists but is not a
    ///   directory.
    pub fn new<P: AsRef<Path>>(root: P) -> FileSystemResult<Self> {
        let root = root.as_ref();
        if !root.exists() {
            fs::create_dir_all(root).map_err(|err| FileSystemError::Directory {
                path: root.to_path_buf(),
                action: "create",
                source: err,
            })?;
        } else if !root.is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn marker_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(HIDDEN_MARKER_SUFFIX);
        path.with_file_name(name)
    }

    fn walk(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> FileSystemResult<()> {
        let entries = fs::read_dir(dir).map_err(|err| FileSystemError::Directory {
            path: dir.to_path_buf(),
            action: "read",
            source: err,
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| FileSystemError::Directory {
                path: dir.to_path_buf(),
                action: "read",
                source: err,
            })?;
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, extension, out)?;
            } else if path.extension().is_some_and(|ext| ext == extension) {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl FileSystemProvider for StandardFileSystemProvider {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_files(
        &self,
        extension: &str,
        subdirs: Option<&[String]>,
    ) -> FileSystemResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        match subdirs {
            Some(dirs) => {
                for dir in dirs {
                    let path = self.root.join(dir);
                    if path.is_dir() {
                        Self::walk(&path, extension, &mut files)?;
                    }
                }
            }
            None => Self::walk(&self.root, extension, &mut files)?,
        }
        files.sort();
        Ok(files)
    }

    fn open_file<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<File> {
        let path = self.resolve(path);
        File::open(&path).map_err(|err| FileSystemError::File {
            path,
            action: "open",
            source: err,
        })
    }

    fn file_exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.resolve(path).is_file()
    }

    fn stat<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<FileStat> {
        let path = self.resolve(path);
        let meta = fs::metadata(&path).map_err(|err| FileSystemError::File {
            path: path.clone(),
            action: "stat",
            source: err,
        })?;
        let modified = meta.modified().map_err(|err| FileSystemError::File {
            path: path.clone(),
            action: "stat",
            source: err,
        })?;
        // Creation time is not available on every filesystem.
        let created = meta.created().unwrap_or(modified);
        Ok(FileStat {
            len: meta.len(),
            created,
            modified,
        })
    }

    fn add_file<P: AsRef<Path>>(&self, path: P, contents: &[u8]) -> FileSystemResult<()> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| FileSystemError::Directory {
                path: parent.to_path_buf(),
                action: "create",
                source: err,
            })?;
        }
        fs::write(&path, contents).map_err(|err| FileSystemError::File {
            path,
            action: "write",
            source: err,
        })
    }

    fn delete_file<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()> {
        let path = self.resolve(path);
        let marker = Self::marker_path(&path);
        if marker.exists() {
            fs::remove_file(&marker).map_err(|err| FileSystemError::File {
                path: marker,
                action: "remove",
                source: err,
            })?;
        }
        fs::remove_file(&path).map_err(|err| FileSystemError::File {
            path,
            action: "remove",
            source: err,
        })
    }

    fn set_hidden<P: AsRef<Path>>(&self, path: P, hidden: bool) -> FileSystemResult<()> {
        let path = self.resolve(path);
        let marker = Self::marker_path(&path);
        if hidden {
            fs::write(&marker, b"").map_err(|err| FileSystemError::File {
                path: marker,
                action: "write",
                source: err,
            })
        } else if marker.exists() {
            fs::remove_file(&marker).map_err(|err| FileSystemError::File {
                path: marker,
                action: "remove",
                source: err,
            })
        } else {
            Ok(())
        }
    }

    fn is_hidden<P: AsRef<Path>>(&self, path: P) -> bool {
        Self::marker_path(&self.resolve(path)).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn provider() -> (tempfile::TempDir, StandardFileSystemProvider) {
        let dir = tempdir().unwrap();
        let fs = StandardFileSystemProvider::new(dir.path()).unwrap();
        (dir, fs)
    }

    #[test]
    fn test_new_creates_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("packages");
        assert!(!root.exists());
        StandardFileSystemProvider::new(&root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_new_rejects_file_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        assert!(StandardFileSystemProvider::new(&file).is_err());
    }

    #[test]
    fn test_add_list_delete() {
        let (_dir, fs) = provider();
        fs.add_file("a.dpk", b"aa").unwrap();
        fs.add_file("nested/b.dpk", b"bb").unwrap();
        fs.add_file("ignored.txt", b"cc").unwrap();

        let files = fs.list_files("dpk", None).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| p.is_absolute()));

        fs.delete_file("a.dpk").unwrap();
        let files = fs.list_files("dpk", None).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_list_files_with_subdirs() {
        let (_dir, fs) = provider();
        fs.add_file("top.dpk", b"t").unwrap();
        fs.add_file("proj-a/a.dpk", b"a").unwrap();
        fs.add_file("proj-b/b.dpk", b"b").unwrap();

        let dirs = vec!["proj-a".to_string(), "missing".to_string()];
        let files = fs.list_files("dpk", Some(&dirs)).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("proj-a/a.dpk"));
    }

    #[test]
    fn test_hidden_marker_round_trip() {
        let (_dir, fs) = provider();
        fs.add_file("pkg.dpk", b"data").unwrap();
        assert!(!fs.is_hidden("pkg.dpk"));

        fs.set_hidden("pkg.dpk", true).unwrap();
        assert!(fs.is_hidden("pkg.dpk"));
        // The archive itself is untouched.
        assert!(fs.file_exists("pkg.dpk"));

        fs.set_hidden("pkg.dpk", false).unwrap();
        assert!(!fs.is_hidden("pkg.dpk"));
        // Unhiding twice is fine.
        fs.set_hidden("pkg.dpk", false).unwrap();
    }

    #[test]
    fn test_delete_removes_marker() {
        let (_dir, fs) = provider();
        fs.add_file("pkg.dpk", b"data").unwrap();
        fs.set_hidden("pkg.dpk", true).unwrap();
        fs.delete_file("pkg.dpk").unwrap();
        assert!(!fs.file_exists("pkg.dpk"));
        assert!(fs.list_files("dpk", None).unwrap().is_empty());
    }

    #[test]
    fn test_stat_reports_length() {
        let (_dir, fs) = provider();
        fs.add_file("pkg.dpk", b"12345").unwrap();
        let stat = fs.stat("pkg.dpk").unwrap();
        assert_eq!(stat.len, 5);
    }

    #[test]
    fn test_relative_rejects_outside_root() {
        let (_dir, fs) = provider();
        assert!(fs.relative("/somewhere/else.dpk").is_err());
        let rel = fs.relative(fs.resolve("sub/x.dpk")).unwrap();
        assert_eq!(rel, PathBuf::from("sub/x.dpk"));
    }
}
