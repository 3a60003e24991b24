//! TOML configuration parsing for node manifests and the workspace root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::node::NodeKind;

/// File name of both node manifests and the workspace root config.
pub const MANIFEST_FILE: &str = "weave.toml";

const DEFAULT_CACHE_DIR: &str = ".weave/checksums";
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_MAX_DEPTH: usize = 3;

/// Node configuration as defined in a node's `weave.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub deps: Deps,
    #[serde(default)]
    pub sources: SourceSet,
    #[serde(default)]
    pub commands: Commands,
}

/// Node dependencies configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deps {
    /// Names of other workspace nodes this node depends on.
    #[serde(default)]
    pub internal: Vec<String>,
}

/// Which files under a node's location make up its compiled sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet {
    /// Directories (relative to the node) that are walked for sources.
    #[serde(default = "default_include")]
    pub include: Vec<PathBuf>,
    /// File extensions without the leading dot. Empty means every file.
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_include() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

impl Default for SourceSet {
    fn default() -> Self {
        Self {
            include: default_include(),
            extensions: Vec::new(),
        }
    }
}

impl SourceSet {
    /// Returns true if `path` has one of the configured extensions.
    pub fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }
}

/// Shell commands for the two compilation phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands {
    #[serde(default)]
    pub typecheck: Option<String>,
    #[serde(default)]
    pub transpile: Option<String>,
}

impl Commands {
    /// Fills unset commands from `defaults`. Values already set win.
    pub fn merged_with(&self, defaults: &Commands) -> Commands {
        Commands {
            typecheck: self.typecheck.clone().or_else(|| defaults.typecheck.clone()),
            transpile: self.transpile.clone().or_else(|| defaults.transpile.clone()),
        }
    }
}

/// Workspace-level configuration, read from the `[workspace]` table of the
/// root `weave.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Checksum cache directory. Relative paths resolve against the root.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Upper bound on a single type-check subprocess. Unset means no limit.
    #[serde(default)]
    pub typecheck_timeout_secs: Option<u64>,
    /// Quiet period gathering change bursts before a watch round starts.
    #[serde(default = "default_debounce_ms")]
    pub watch_debounce_ms: u64,
    /// How deep discovery descends looking for node manifests.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Default commands for nodes that declare none.
    #[serde(default)]
    pub commands: Commands,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            typecheck_timeout_secs: None,
            watch_debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_depth: DEFAULT_MAX_DEPTH,
            commands: Commands::default(),
        }
    }
}

#[derive(Deserialize)]
struct RootFile {
    workspace: Option<WorkspaceConfig>,
}

impl WorkspaceConfig {
    /// Loads `<root>/weave.toml`. A missing file or a file without a
    /// `[workspace]` table yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> crate::Result<Self> {
        let path = root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let file: RootFile = toml::from_str(&content).map_err(|error| crate::Error::Toml {
            error,
            context: path.display().to_string(),
        })?;
        Ok(file.workspace.unwrap_or_default())
    }

    /// Resolves the cache directory against the workspace root.
    pub fn resolved_cache_dir(&self, root: &Path) -> PathBuf {
        if self.cache_dir.is_absolute() {
            self.cache_dir.clone()
        } else {
            root.join(&self.cache_dir)
        }
    }

    pub fn typecheck_timeout(&self) -> Option<Duration> {
        self.typecheck_timeout_secs.map(Duration::from_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}
