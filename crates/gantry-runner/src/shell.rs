//! Shell-based command execution on the host.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ports::{ExecOutput, ExecRequest, OutputLine, ProcessRuntime};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

/// Configuration for the shell runtime.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Used when a request carries no timeout of its own.
    pub timeout: Option<Duration>,
    /// Host variables copied into every command's environment. Everything
    /// else in the host environment is withheld.
    pub passthrough_env: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(3600)),
            passthrough_env: vec!["PATH".to_string(), "HOME".to_string()],
        }
    }
}

/// Runs commands through a host shell.
pub struct ShellRuntime {
    config: ShellConfig,
}

impl ShellRuntime {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, request: &ExecRequest) -> Command {
        let mut command = Command::new(&request.shell);
        let script = request.command.as_str();
        match request.shell.as_str() {
            "pwsh" | "powershell" => command.args(["-NoProfile", "-Command", script]),
            "bash" => command.args(["--noprofile", "--norc", "-eo", "pipefail", "-c", script]),
            _ => command.args(["-c", script]),
        };

        let mut env: BTreeMap<String, String> = self
            .config
            .passthrough_env
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v)))
            .collect();
        env.extend(request.env.clone());

        command.env_clear().envs(&env);
        if let Some(workdir) = &request.workdir {
            command.current_dir(workdir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for ShellRuntime {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

#[async_trait]
impl ProcessRuntime for ShellRuntime {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutput> {
        let start = std::time::Instant::now();
        info!(shell = %request.shell, workdir = ?request.workdir, "Executing command");

        let mut child = self.build_command(&request).spawn().map_err(|e| {
            gantry_core::Error::Internal(format!("Failed to spawn `{}`: {e}", request.shell))
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();

        let stdout_handle = child.stdout.take().map(|stdout| {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(OutputLine::stdout(line)).is_err() {
                        break;
                    }
                }
            })
        });

        let stderr_handle = child.stderr.take().map(|stderr| {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(OutputLine::stderr(line)).is_err() {
                        break;
                    }
                }
            })
        });
        drop(tx);

        let limit = request.timeout.or(self.config.timeout);
        let wait_result = match limit {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "Command timed out, killing process");
                    let _ = child.kill().await;
                    return Err(gantry_core::Error::Internal(format!(
                        "Command timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => child.wait().await,
        };

        if let Some(handle) = stdout_handle {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_handle {
            let _ = handle.await;
        }

        let status = wait_result.map_err(|e| {
            gantry_core::Error::Internal(format!("Failed to wait for process: {e}"))
        })?;

        let mut output = Vec::new();
        while let Some(line) = rx.recv().await {
            output.push(line);
        }

        let exit_code = status.code().unwrap_or(-1);
        debug!(exit_code, duration_ms = start.elapsed().as_millis() as u64, "Command completed");

        Ok(ExecOutput { exit_code, output })
    }
}
