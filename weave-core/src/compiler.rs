//! Compiler subprocess invocation with streamed output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::command_validator::CommandValidator;
use crate::error::{Error, Result};
use crate::node::Node;

/// The two built-in compilation passes of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Full safety-checked pass, cacheable through fingerprints.
    TypeCheck,
    /// Fast unchecked pass producing runnable output.
    Transpile,
}

impl Phase {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::TypeCheck => "typecheck",
            Phase::Transpile => "transpile",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line of compiler output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub is_stderr: bool,
}

/// Runs a compilation phase for a node.
///
/// Implementations report output through `on_line` as it arrives and
/// return whether the compiler exited successfully. The returned future
/// must kill any subprocess it started when dropped.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn run(
        &self,
        node: &Node,
        phase: Phase,
        on_line: &mut (dyn FnMut(OutputLine) + Send),
    ) -> Result<bool>;
}

/// Runs the node's configured command through `sh -c` in its directory.
#[derive(Debug, Clone, Default)]
pub struct ShellCompiler {
    validator: CommandValidator,
    typecheck_timeout: Option<Duration>,
}

impl ShellCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, validator: CommandValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Kills a type-check subprocess that runs longer than `timeout`.
    pub fn with_typecheck_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.typecheck_timeout = timeout;
        self
    }
}

#[async_trait]
impl Compiler for ShellCompiler {
    async fn run(
        &self,
        node: &Node,
        phase: Phase,
        on_line: &mut (dyn FnMut(OutputLine) + Send),
    ) -> Result<bool> {
        let spawn_error = |message: String| Error::Spawn {
            node: node.name().to_string(),
            phase: phase.to_string(),
            message,
        };

        let command = node
            .command(phase)
            .ok_or_else(|| spawn_error(format!("no {} command configured", phase)))?;
        self.validator.validate(node.name(), command)?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(node.location())
            .env("WEAVE_NODE_NAME", node.name())
            .env("WEAVE_NODE_KIND", node.kind().as_str())
            .env("WEAVE_PHASE", phase.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        debug!(node = node.name(), %phase, pid = ?child.id(), "spawned compiler");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("failed to capture stderr".to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        forward_lines(stdout, false, tx.clone());
        forward_lines(stderr, true, tx);

        let timeout = match phase {
            Phase::TypeCheck => self.typecheck_timeout,
            Phase::Transpile => None,
        };

        let completion = async {
            while let Some(line) = rx.recv().await {
                on_line(line);
            }
            child.wait().await
        };

        let waited = match timeout {
            Some(limit) => match tokio::time::timeout(limit, completion).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(node = node.name(), %phase, "compiler timed out after {:?}", limit);
                    let _ = child.kill().await;
                    return Err(Error::Compilation {
                        node: node.name().to_string(),
                        message: format!("{} timed out after {}s", phase, limit.as_secs()),
                    });
                }
            },
            None => completion.await,
        };

        let status = waited.map_err(|e| Error::Compilation {
            node: node.name().to_string(),
            message: format!("failed to wait for compiler: {}", e),
        })?;

        debug!(node = node.name(), %phase, code = ?status.code(), "compiler exited");
        Ok(status.success())
    }
}

fn forward_lines<R>(reader: R, is_stderr: bool, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let text = line.trim_end();
            if text.is_empty() {
                continue;
            }
            let line = OutputLine {
                text: text.to_string(),
                is_stderr,
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}
