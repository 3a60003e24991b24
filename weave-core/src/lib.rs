//! Core library for dependency-aware incremental recompilation of a
//! monorepo's packages and services.

pub mod checksum;
pub mod command_validator;
pub mod compiler;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod node;
pub mod observer;
pub mod scheduler;
pub mod summary;
pub mod watch;
pub mod watcher;
pub mod workspace;

pub use checksum::{ChecksumStore, FingerprintMap};
pub use command_validator::CommandValidator;
pub use compiler::{Compiler, OutputLine, Phase, ShellCompiler};
pub use config::{Commands, NodeConfig, SourceSet, WorkspaceConfig};
pub use error::{Error, Result};
pub use events::{EventKind, EventStream, RecompilationEvent};
pub use graph::DependencyGraph;
pub use node::{CompileContext, Node, NodeKind, NodeSnapshot, Outcome, TranspileState, TypeCheckState};
pub use observer::{ChannelObserver, StateObserver, TracingObserver};
pub use scheduler::Scheduler;
pub use summary::{BuildSummary, NodeReport, NodeResult};
pub use watch::{FileChangeTrigger, WatchEvent, WatchOptions, WatchSession};
pub use watcher::FileWatcher;
pub use workspace::{Scanner, WorkspaceMember, WorkspaceProvider};
