use super::ContentHash;
use crate::filesystem::FileSystem;
use crate::progress::ProgressReporter;
use rayon::prelude::*;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;
use twox_hash::XxHash64;

const BLOCK_SIZE: usize = 64 * 1024;

/// Whole-file XxHash64 over the filesystem collaborator.
///
/// Hashing is the dominant cost of a run, so callers only hash candidates
/// that failed the trusted-match check, and each one at most once.
pub struct Hasher<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> Hasher<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    pub fn hash_file(&self, path: &Path) -> io::Result<ContentHash> {
        let mut reader = self.fs.open(path)?;
        let hash = hash_reader(&mut reader)?;
        trace!("Hashed {} -> {}", path.display(), hash);
        Ok(hash)
    }

    /// Hash independent files on the rayon pool.
    ///
    /// Results are returned in input order; nothing but the progress counter
    /// is shared between workers.
    pub fn hash_all<P>(&self, paths: &[P], reporter: &dyn ProgressReporter) -> Vec<io::Result<ContentHash>>
    where
        P: AsRef<Path> + Sync,
    {
        let total = paths.len();
        let hashed = AtomicUsize::new(0);
        reporter.on_hash_start(total);

        let results: Vec<_> = paths
            .par_iter()
            .map(|path| {
                let result = self.hash_file(path.as_ref());
                let done = hashed.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.on_hash_progress(done, total);
                result
            })
            .collect();

        reporter.on_hash_complete(total);
        results
    }
}

pub fn hash_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<ContentHash> {
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.write(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ContentHash(hasher.finish()))
}

pub fn hash_data(data: &[u8]) -> ContentHash {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    ContentHash(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFs;
    use crate::progress::SilentReporter;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_streaming_matches_one_shot() {
        // spans several blocks so chunk boundaries are exercised
        let data: Vec<u8> = (0..(BLOCK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let streamed = hash_reader(&mut data.as_slice()).unwrap();
        assert_eq!(streamed, hash_data(&data));
    }

    #[test]
    fn test_hash_all_preserves_order_and_reports_errors() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "alpha").unwrap();
        fs::write(&b, "beta").unwrap();
        let missing = dir.path().join("missing.txt");

        let hasher = Hasher::new(&LocalFs);
        let results = hasher.hash_all(&[a, missing, b], &SilentReporter);

        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), hash_data(b"alpha"));
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), hash_data(b"beta"));
    }

    #[test]
    fn test_identical_content_same_hash() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("one.bin");
        let b = dir.path().join("two.bin");
        fs::write(&a, vec![0xAAu8; 4096]).unwrap();
        fs::write(&b, vec![0xAAu8; 4096]).unwrap();

        let hasher = Hasher::new(&LocalFs);
        assert_eq!(hasher.hash_file(&a).unwrap(), hasher.hash_file(&b).unwrap());
    }
}
