//! In-memory implementations of the engine's ports.

use async_trait::async_trait;
use gantry_core::events::Event;
use gantry_core::ports::{
    EventBus, ExecOutput, ExecRequest, OutputLine, ProcessRuntime, RegistryClient, Workspace,
};
use gantry_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a scripted command does.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i32,
    pub output: Vec<String>,
    pub delay: Option<Duration>,
}

/// One call observed by [`ScriptedRuntime`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub shell: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
}

/// Process runtime driven by per-command scripts. Unscripted commands
/// succeed silently. Every call is recorded with its env.
#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, command: impl Into<String>, script: Script) -> &Self {
        lock(&self.scripts).insert(command.into(), script);
        self
    }

    pub fn fail(&self, command: impl Into<String>) -> &Self {
        self.script(
            command,
            Script {
                exit_code: 1,
                ..Script::default()
            },
        )
    }

    pub fn delay(&self, command: impl Into<String>, delay: Duration) -> &Self {
        self.script(
            command,
            Script {
                delay: Some(delay),
                ..Script::default()
            },
        )
    }

    /// Echo every env value the command receives.
    pub fn echo_env(&self, command: impl Into<String>) -> &Self {
        self.script(
            command,
            Script {
                output: vec!["$ENV".to_string()],
                ..Script::default()
            },
        )
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.command.clone()).collect()
    }

    /// Env of the first call of `command`.
    pub fn env_of(&self, command: &str) -> Option<BTreeMap<String, String>> {
        lock(&self.calls)
            .iter()
            .find(|c| c.command == command)
            .map(|c| c.env.clone())
    }
}

#[async_trait]
impl ProcessRuntime for ScriptedRuntime {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutput> {
        lock(&self.calls).push(RecordedCall {
            shell: request.shell.clone(),
            command: request.command.clone(),
            env: request.env.clone(),
        });
        let script = lock(&self.scripts)
            .get(&request.command)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        let mut output = Vec::new();
        for line in script.output {
            if line == "$ENV" {
                output.extend(request.env.iter().map(|(k, v)| OutputLine::stdout(format!("{k}={v}"))));
            } else {
                output.push(OutputLine::stdout(line));
            }
        }
        Ok(ExecOutput {
            exit_code: script.exit_code,
            output,
        })
    }
}

/// Registry client that records publishes.
pub struct RecordingRegistry {
    identity: String,
    publishes: Mutex<Vec<(String, String)>>,
}

impl RecordingRegistry {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            publishes: Mutex::new(Vec::new()),
        }
    }

    /// `(package, access)` pairs in publish order.
    pub fn publishes(&self) -> Vec<(String, String)> {
        lock(&self.publishes).clone()
    }
}

impl Default for RecordingRegistry {
    fn default() -> Self {
        Self::new("ci-bot")
    }
}

#[async_trait]
impl RegistryClient for RecordingRegistry {
    async fn whoami(&self) -> Result<String> {
        Ok(self.identity.clone())
    }

    async fn publish(&self, package: &str, access: &str) -> Result<()> {
        lock(&self.publishes).push((package.to_string(), access.to_string()));
        Ok(())
    }
}

/// Workspace held in memory. Snapshots are JSON maps of path to bytes.
#[derive(Default)]
pub struct MemoryWorkspace {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        lock(&self.files).insert(path.into(), contents.into());
    }

    pub fn remove(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).remove(path)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.file(path).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{path} not found in workspace"),
            ))
        })
    }

    async fn snapshot(&self, paths: &[String]) -> Result<Vec<u8>> {
        let files = lock(&self.files);
        let captured: BTreeMap<&String, &Vec<u8>> = files
            .iter()
            .filter(|(path, _)| paths.iter().any(|p| path.starts_with(p.as_str())))
            .collect();
        Ok(serde_json::to_vec(&captured)?)
    }

    async fn restore(&self, archive: &[u8]) -> Result<()> {
        let restored: BTreeMap<String, Vec<u8>> = serde_json::from_slice(archive)?;
        lock(&self.files).extend(restored);
        Ok(())
    }
}

/// Event bus that keeps every event.
#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    /// Subjects of every recorded event, in order.
    pub fn subjects(&self) -> Vec<String> {
        lock(&self.events).iter().map(Event::subject).collect()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| predicate(e)).count()
    }

    /// Every output line emitted by steps.
    pub fn output_lines(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                Event::StepOutput(p) => Some(p.line.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        lock(&self.events).push(event);
        Ok(())
    }
}
