//! Content fingerprints of node sources for incremental type-checking.
//!
//! A [`FingerprintMap`] maps every source file of a node, plus the sources of
//! all of its transitive dependencies, to a content digest. The map from the
//! last successful type-check is persisted per node; when the freshly
//! calculated map equals the persisted one, the type-check can be skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::workspace::is_ignored;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Source path to content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintMap(BTreeMap<String, String>);

impl FingerprintMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.0.insert(path.into(), hash.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for FingerprintMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Decides whether a node needs a rebuild given its last persisted map.
///
/// Returns `true` when `old` is absent, when the key sets differ, or when any
/// shared key carries a different hash.
pub fn compare(old: Option<&FingerprintMap>, current: &FingerprintMap) -> bool {
    let Some(old) = old else {
        return true;
    };

    if old.len() != current.len() {
        return true;
    }

    for (path, hash) in current.iter() {
        match old.get(path) {
            Some(previous) if previous == hash => {}
            _ => return true,
        }
    }

    false
}

/// On-disk store of one fingerprint map per node.
#[derive(Debug, Clone)]
pub struct ChecksumStore {
    root: PathBuf,
    cache_dir: PathBuf,
}

impl ChecksumStore {
    /// Creates a store. Map keys are made relative to `root` when possible.
    pub fn new(root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the persisted map for `node_name`.
    pub fn cache_path(&self, node_name: &str) -> PathBuf {
        self.cache_dir.join(cache_file_name(node_name))
    }

    /// Hashes the sources of `node` and of all its transitive dependencies.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any source directory cannot be walked or any file
    /// cannot be read; callers treat that as "assume changed".
    pub fn calculate(&self, node: &Node) -> Result<FingerprintMap> {
        let mut files = BTreeSet::new();
        let mut members = vec![node];
        let deps = node.transitive_dependencies();
        members.extend(deps.iter().map(|d| d.as_ref()));

        for member in members {
            self.collect_sources(member, &mut files)?;
        }

        let entries: Result<Vec<(String, String)>> = files
            .into_par_iter()
            .map(|path| {
                let hash = hash_file(&path).map_err(|e| Error::Checksum {
                    node: node.name().to_string(),
                    message: format!("failed to hash {}: {}", path.display(), e),
                })?;
                Ok((self.key_for(&path), hash))
            })
            .collect();

        let map: FingerprintMap = entries?.into_iter().collect();
        debug!(node = node.name(), files = map.len(), "calculated fingerprints");
        Ok(map)
    }

    fn collect_sources(&self, node: &Node, files: &mut BTreeSet<PathBuf>) -> Result<()> {
        let sources = node.sources();
        for include in &sources.include {
            let dir = node.location().join(include);
            let walker = WalkDir::new(&dir)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !is_ignored(e) && !e.path().starts_with(&self.cache_dir));

            for entry in walker {
                let entry = entry.map_err(|e| Error::Checksum {
                    node: node.name().to_string(),
                    message: format!("failed to walk {}: {}", dir.display(), e),
                })?;
                if entry.file_type().is_file() && sources.matches(entry.path()) {
                    files.insert(entry.path().to_path_buf());
                }
            }
        }
        Ok(())
    }

    fn key_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Loads the last persisted map for `node_name`.
    ///
    /// A missing, unreadable or corrupt file reads as absent.
    pub fn read(&self, node_name: &str) -> Option<FingerprintMap> {
        let path = self.cache_path(node_name);
        if !path.exists() {
            return None;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(node = node_name, path = %path.display(), "unreadable checksum cache: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!(node = node_name, path = %path.display(), "corrupt checksum cache: {}", e);
                None
            }
        }
    }

    /// Persists `map` for `node_name`.
    ///
    /// The map is written to a temporary sibling file, flushed, and renamed
    /// over the target so a crash never leaves a truncated cache file.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory or file cannot be written.
    pub fn write(&self, node_name: &str, map: &FingerprintMap) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;

        let cache_path = self.cache_path(node_name);
        let temp_path = cache_path.with_extension(format!("json.{}.tmp", std::process::id()));
        let content = serde_json::to_vec_pretty(map)?;

        let written = File::create(&temp_path).and_then(|mut file| {
            file.write_all(&content)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::Io(e));
        }

        fs::rename(&temp_path, &cache_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::Io(e)
        })?;

        debug!(node = node_name, path = %cache_path.display(), "persisted fingerprints");
        Ok(())
    }

    /// Removes the persisted map for `node_name`, if any.
    pub fn clear(&self, node_name: &str) -> Result<()> {
        let path = self.cache_path(node_name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Removes the whole cache directory.
    pub fn clear_all(&self) -> Result<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        Ok(())
    }
}

/// `@scope/name` becomes `scope__name.json`; scoped names keep their scope
/// so two scopes publishing the same local name never share a file.
fn cache_file_name(node_name: &str) -> String {
    let trimmed = node_name.trim_start_matches('@');
    format!("{}.json", trimmed.replace(['/', '\\'], "__"))
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
