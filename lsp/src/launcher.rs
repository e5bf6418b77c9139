//! How the analysis service process comes into existence.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// The byte streams of one service instance.
pub struct ServiceIo {
    /// Service output (responses and events).
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Service input (requests).
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// The owning child, if the service is an OS process.
    pub child: Option<Child>,
}

/// Starts a fresh service instance rooted at a project directory.
pub trait ServiceLauncher: Send + Sync {
    fn launch(&self, project_dir: &Path) -> Result<ServiceIo>;
}

/// Spawns the configured command as a child process.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    command: String,
    args: Vec<String>,
}

impl CommandLauncher {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl ServiceLauncher for CommandLauncher {
    fn launch(&self, project_dir: &Path) -> Result<ServiceIo> {
        let resolved = which::which(&self.command)
            .with_context(|| format!("{} not found in PATH", self.command))?;
        let mut cmd = Command::new(&resolved);
        cmd.args(&self.args)
            .current_dir(project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        for (key, _) in std::env::vars_os() {
            if let Some(name) = key.to_str()
                && cellbook_types::is_secret_env(name)
            {
                cmd.env_remove(&key);
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", self.command))?;
        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        Ok(ServiceIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}
