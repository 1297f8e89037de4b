use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// The filesystem operations the reconciler and executor depend on.
///
/// Enumeration goes through the scanner; everything else goes through here so
/// tests can substitute failing or read-only implementations.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Whether two paths name the same file (symlinked directory, bind mount).
    fn same_file(&self, a: &Path, b: &Path) -> bool {
        a == b
    }
}

/// `std::fs` backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so a dangling link still counts as present
        fs::symlink_metadata(path).is_ok()
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    #[cfg(unix)]
    fn same_file(&self, a: &Path, b: &Path) -> bool {
        use std::os::unix::fs::MetadataExt;

        if a == b {
            return true;
        }
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
            _ => false,
        }
    }

    #[cfg(not(unix))]
    fn same_file(&self, a: &Path, b: &Path) -> bool {
        if a == b {
            return true;
        }
        match (fs::canonicalize(a), fs::canonicalize(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_same_file_sees_through_directory_links() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("f.txt"), "f").unwrap();
        fs::write(real.join("g.txt"), "f").unwrap();

        assert!(LocalFs.same_file(&real.join("f.txt"), &real.join("f.txt")));
        assert!(!LocalFs.same_file(&real.join("f.txt"), &real.join("g.txt")));
        assert!(!LocalFs.same_file(&real.join("f.txt"), &real.join("missing.txt")));

        #[cfg(unix)]
        {
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();
            assert!(LocalFs.same_file(&link.join("f.txt"), &real.join("f.txt")));
        }
    }
}
