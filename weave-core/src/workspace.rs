//! Workspace discovery: which directories are nodes and what they declare.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use walkdir::{DirEntry, WalkDir};

use crate::command_validator::CommandValidator;
use crate::config::{Commands, NodeConfig, SourceSet, WorkspaceConfig, MANIFEST_FILE};
use crate::error::{Error, Result};
use crate::node::NodeKind;

/// Directories never descended into while discovering nodes or hashing sources.
pub const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "target", "dist", ".weave"];

/// One workspace member as declared by its manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub name: String,
    pub kind: NodeKind,
    pub version: Option<String>,
    /// Directory holding the member manifest.
    pub path: PathBuf,
    #[serde(deserialize_with = "deserialize_deps", serialize_with = "serialize_deps")]
    pub deps: SmallVec<[String; 4]>,
    pub sources: SourceSet,
    pub commands: Commands,
}

fn deserialize_deps<'de, D>(deserializer: D) -> std::result::Result<SmallVec<[String; 4]>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(SmallVec::from_vec(Vec::<String>::deserialize(deserializer)?))
}

fn serialize_deps<S>(deps: &SmallVec<[String; 4]>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    deps.as_slice().serialize(serializer)
}

impl WorkspaceMember {
    pub fn new(name: impl Into<String>, kind: NodeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            version: None,
            path: path.into(),
            deps: SmallVec::new(),
            sources: SourceSet::default(),
            commands: Commands::default(),
        }
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_sources(mut self, sources: SourceSet) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_commands(mut self, commands: Commands) -> Self {
        self.commands = commands;
        self
    }
}

/// Supplies the workspace membership the dependency graph is built from.
pub trait WorkspaceProvider {
    /// Returns every member with its declared direct dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest cannot be read or is invalid.
    fn members(&self) -> Result<Vec<WorkspaceMember>>;
}

impl WorkspaceProvider for Vec<WorkspaceMember> {
    fn members(&self) -> Result<Vec<WorkspaceMember>> {
        Ok(self.clone())
    }
}

/// Scans a workspace root for `weave.toml` node manifests.
pub struct Scanner {
    root: PathBuf,
    config: WorkspaceConfig,
}

impl Scanner {
    /// Creates a scanner, loading the root `weave.toml` if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the root config exists but is malformed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let config = WorkspaceConfig::load(&root)?;
        Ok(Self { root, config })
    }

    pub fn with_config(root: impl AsRef<Path>, config: WorkspaceConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    fn manifest_paths(&self) -> Vec<PathBuf> {
        let root_manifest = self.root.join(MANIFEST_FILE);
        WalkDir::new(&self.root)
            .max_depth(self.config.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_ignored(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() == MANIFEST_FILE)
            .map(|e| e.path().to_path_buf())
            .filter(|p| p != &root_manifest)
            .collect()
    }

    fn load_member(&self, manifest: &Path) -> Result<WorkspaceMember> {
        let location = manifest
            .parent()
            .ok_or_else(|| Error::ConfigNotFound(manifest.to_path_buf()))?;

        let content = std::fs::read_to_string(manifest)?;
        let config: NodeConfig = toml::from_str(&content).map_err(|error| Error::Toml {
            error,
            context: manifest.display().to_string(),
        })?;

        CommandValidator::validate_node_name(&config.name)?;
        if let Some(version) = &config.version {
            semver::Version::parse(version).map_err(|e| Error::InvalidVersion {
                node: config.name.clone(),
                version: version.clone(),
                message: e.to_string(),
            })?;
        }

        Ok(WorkspaceMember {
            name: config.name,
            kind: config.kind,
            version: config.version,
            path: location.to_path_buf(),
            deps: SmallVec::from_vec(config.deps.internal),
            sources: config.sources,
            commands: config.commands.merged_with(&self.config.commands),
        })
    }
}

impl WorkspaceProvider for Scanner {
    fn members(&self) -> Result<Vec<WorkspaceMember>> {
        let members: Result<Vec<WorkspaceMember>> = self
            .manifest_paths()
            .into_par_iter()
            .map(|manifest| self.load_member(&manifest))
            .collect();

        let mut members = members?;
        members.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!(count = members.len(), root = %self.root.display(), "discovered workspace members");
        Ok(members)
    }
}

pub(crate) fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}
