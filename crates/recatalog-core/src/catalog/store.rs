use super::{Catalog, CatalogEntry};
use crate::error::{Error, Result};
use crate::hasher::ContentHash;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// On-disk form of one entry: file name, parent directory, size.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    f: String,
    p: String,
    s: StoredSize,
}

/// A hash key maps to one entry, or to several when the catalog records more
/// than one path for the same content.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredSlot {
    One(StoredEntry),
    Many(Vec<StoredEntry>),
}

/// Size in bytes. Older catalogs and hand edits store it as a string.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
struct StoredSize(u64);

impl<'de> Deserialize<'de> for StoredSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SizeVisitor;

        impl<'de> de::Visitor<'de> for SizeVisitor {
            type Value = StoredSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative size in bytes, as a number or numeric string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<StoredSize, E> {
                Ok(StoredSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<StoredSize, E> {
                u64::try_from(v)
                    .map(StoredSize)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<StoredSize, E> {
                v.trim()
                    .parse()
                    .map(StoredSize)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

/// Loads and atomically persists the catalog file.
pub struct CatalogStore;

impl CatalogStore {
    /// Load the catalog at `path`. A missing file is an empty catalog; anything
    /// unreadable or structurally invalid is `CorruptCatalog`.
    pub fn load(path: &Path) -> Result<Catalog> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No catalog at {}, starting empty", path.display());
                return Ok(Catalog::new());
            }
            Err(e) => return Err(Error::corrupt(path, format!("unreadable: {}", e))),
        };

        let catalog = Self::from_json(&bytes, path)?;
        info!("Loaded {} catalog entries from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Write the catalog to a temp file beside `path`, sync it, then rename it
    /// over the live file. The live file is never partially written.
    pub fn save(catalog: &Catalog, path: &Path) -> Result<()> {
        let persist_err = |source: io::Error| Error::Persist {
            path: path.to_path_buf(),
            source,
        };

        let bytes = Self::to_json(catalog).map_err(persist_err)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(persist_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(persist_err)?;
        tmp.write_all(&bytes).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(path).map_err(|e| persist_err(e.error))?;

        debug!("Persisted {} catalog entries to {}", catalog.len(), path.display());
        Ok(())
    }

    pub fn from_json(bytes: &[u8], path: &Path) -> Result<Catalog> {
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_slice(bytes).map_err(|e| Error::corrupt(path, e.to_string()))?;

        let mut catalog = Catalog::new();
        for (key, value) in raw {
            let hash: ContentHash = key
                .parse()
                .map_err(|e: crate::hasher::ParseHashError| Error::corrupt(path, e.to_string()))?;
            let slot: StoredSlot = serde_json::from_value(value).map_err(|e| {
                Error::corrupt(path, format!("entry {}: {}", key, e))
            })?;
            let stored = match slot {
                StoredSlot::One(entry) => vec![entry],
                StoredSlot::Many(entries) => entries,
            };

            for entry in stored {
                if entry.f.is_empty() {
                    return Err(Error::corrupt(path, format!("entry {}: empty file name", key)));
                }
                let full_path = Path::new(&entry.p).join(&entry.f);
                if let Some(existing) = catalog.lookup_by_path(&full_path) {
                    return Err(Error::corrupt(
                        path,
                        format!(
                            "{} is listed under both {} and {}",
                            full_path.display(),
                            existing.hash,
                            hash
                        ),
                    ));
                }
                catalog.insert(CatalogEntry::new(hash, full_path, entry.s.0));
            }
        }
        Ok(catalog)
    }

    pub fn to_json(catalog: &Catalog) -> io::Result<Vec<u8>> {
        let mut grouped: BTreeMap<String, Vec<StoredEntry>> = BTreeMap::new();
        for entry in catalog.entries() {
            grouped
                .entry(entry.hash.to_string())
                .or_default()
                .push(split_entry(entry)?);
        }

        let stored: BTreeMap<String, StoredSlot> = grouped
            .into_iter()
            .map(|(key, mut entries)| {
                let slot = if entries.len() == 1 {
                    StoredSlot::One(entries.remove(0))
                } else {
                    StoredSlot::Many(entries)
                };
                (key, slot)
            })
            .collect();

        serde_json::to_vec_pretty(&stored).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn split_entry(entry: &CatalogEntry) -> io::Result<StoredEntry> {
    let invalid = |what: &str| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} of {} is not valid UTF-8", what, entry.path.display()),
        )
    };
    let file_name = entry
        .path
        .file_name()
        .ok_or_else(|| invalid("file name"))?
        .to_str()
        .ok_or_else(|| invalid("file name"))?;
    let parent = entry
        .path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let parent = parent.to_str().ok_or_else(|| invalid("directory"))?;

    Ok(StoredEntry {
        f: file_name.to_string(),
        p: parent.to_string(),
        s: StoredSize(entry.size),
    })
}
