//! Exec-based plugin host that communicates with external processes via JSON over stdio.

use crate::protocol::{
    PluginError, PluginInfo, PluginMethod, PluginRequest, PluginResponse, PluginResult,
    PROTOCOL_VERSION,
};
use marquee_core::{MediaLink, ProviderError};
use std::io::{BufRead, BufReader, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors from plugin host operations.
#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("failed to spawn plugin process: {0}")]
    SpawnFailed(std::io::Error),
    #[error("plugin process has no stdin")]
    NoStdin,
    #[error("plugin process has no stdout")]
    NoStdout,
    #[error("failed to write to plugin: {0}")]
    WriteError(std::io::Error),
    #[error("failed to read from plugin: {0}")]
    ReadError(std::io::Error),
    #[error("failed to parse plugin response: {0}")]
    ParseError(serde_json::Error),
    #[error("plugin returned error: {}", .0.message)]
    Plugin(PluginError),
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: u32, actual: u32 },
    #[error("unexpected {received} response to {method}")]
    UnexpectedResponse {
        method: &'static str,
        received: &'static str,
    },
    #[error("request/response ID mismatch: sent {sent}, received {received}")]
    IdMismatch { sent: u64, received: u64 },
    #[error("plugin process terminated unexpectedly")]
    ProcessTerminated,
}

pub type PluginHostResult<T> = Result<T, PluginHostError>;

impl From<PluginHostError> for ProviderError {
    fn from(err: PluginHostError) -> Self {
        match err {
            PluginHostError::Plugin(err) => err.into(),
            PluginHostError::ProcessTerminated => ProviderError::Network {
                message: "plugin process terminated".to_string(),
            },
            PluginHostError::ParseError(err) => ProviderError::Parse {
                message: err.to_string(),
            },
            other => ProviderError::other(other.to_string()),
        }
    }
}

/// Configuration for an external plugin.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl PluginConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }
}

struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Host for an external plugin process.
///
/// Calls block the current thread. A request and all of its responses are
/// exchanged under one lock, so concurrent callers are served one at a time.
pub struct ExecPluginHost {
    config: PluginConfig,
    child: Mutex<Option<Child>>,
    pipes: Mutex<Option<Pipes>>,
    request_id: AtomicU64,
    info: Mutex<Option<PluginInfo>>,
}

impl ExecPluginHost {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
            pipes: Mutex::new(None),
            request_id: AtomicU64::new(1),
            info: Mutex::new(None),
        }
    }

    /// Start the plugin process and run the handshake.
    pub fn start(&self) -> PluginHostResult<PluginInfo> {
        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(PluginHostError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(PluginHostError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(PluginHostError::NoStdout)?;

        *lock(&self.child) = Some(child);
        *lock(&self.pipes) = Some(Pipes {
            stdin,
            stdout: BufReader::new(stdout),
        });

        let info = self.initialize()?;
        *lock(&self.info) = Some(info.clone());

        Ok(info)
    }

    /// Stop the plugin process, asking it to shut down first.
    ///
    /// The polite request is skipped when another call is mid-exchange; the
    /// process is killed either way.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.pipes.try_lock() {
            if let Some(pipes) = guard.as_mut() {
                let shutdown = self.exchange_on(pipes, PluginMethod::Shutdown, |_| {
                    Ok(ControlFlow::Break(()))
                });
                if let Err(err) = shutdown {
                    tracing::debug!(error = %err, "plugin did not acknowledge shutdown");
                }
            }
        }

        if let Some(mut child) = lock(&self.child).take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        *lock(&self.pipes) = None;
        *lock(&self.info) = None;
    }

    pub fn is_running(&self) -> bool {
        lock(&self.child)
            .as_mut()
            .map(|c| c.try_wait().ok().flatten().is_none())
            .unwrap_or(false)
    }

    /// Handshake info (available after start).
    pub fn info(&self) -> Option<PluginInfo> {
        lock(&self.info).clone()
    }

    /// Send a request and wait for its single response.
    pub fn send_request(&self, method: PluginMethod) -> PluginHostResult<PluginResult> {
        let mut reply = None;
        self.exchange(method, |result| {
            reply = Some(result);
            Ok(ControlFlow::Break(()))
        })?;
        reply.ok_or(PluginHostError::ProcessTerminated)
    }

    /// Send a link request, handing each `Link` response to `on_link` as it
    /// is read, until the plugin reports `LinksDone`.
    pub fn stream_links(
        &self,
        method: PluginMethod,
        mut on_link: impl FnMut(MediaLink),
    ) -> PluginHostResult<()> {
        let name = method.name();
        self.exchange(method, |result| match result {
            PluginResult::Link { link } => {
                on_link(link);
                Ok(ControlFlow::Continue(()))
            }
            PluginResult::LinksDone => Ok(ControlFlow::Break(())),
            other => Err(PluginHostError::UnexpectedResponse {
                method: name,
                received: other.name(),
            }),
        })
    }

    fn exchange<F>(&self, method: PluginMethod, on_result: F) -> PluginHostResult<()>
    where
        F: FnMut(PluginResult) -> PluginHostResult<ControlFlow<()>>,
    {
        let mut guard = lock(&self.pipes);
        let pipes = guard.as_mut().ok_or(PluginHostError::ProcessTerminated)?;
        self.exchange_on(pipes, method, on_result)
    }

    fn exchange_on<F>(
        &self,
        pipes: &mut Pipes,
        method: PluginMethod,
        mut on_result: F,
    ) -> PluginHostResult<()>
    where
        F: FnMut(PluginResult) -> PluginHostResult<ControlFlow<()>>,
    {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = PluginRequest { id, method };
        let json = serde_json::to_string(&request).map_err(PluginHostError::ParseError)?;

        writeln!(pipes.stdin, "{}", json).map_err(PluginHostError::WriteError)?;
        pipes.stdin.flush().map_err(PluginHostError::WriteError)?;

        loop {
            let mut line = String::new();
            let read = pipes
                .stdout
                .read_line(&mut line)
                .map_err(PluginHostError::ReadError)?;
            if read == 0 {
                return Err(PluginHostError::ProcessTerminated);
            }
            if line.trim().is_empty() {
                continue;
            }

            let response: PluginResponse =
                serde_json::from_str(&line).map_err(PluginHostError::ParseError)?;
            if response.id != id {
                return Err(PluginHostError::IdMismatch {
                    sent: id,
                    received: response.id,
                });
            }
            if let PluginResult::Error(err) = response.result {
                return Err(PluginHostError::Plugin(err));
            }
            if on_result(response.result)?.is_break() {
                return Ok(());
            }
        }
    }

    fn initialize(&self) -> PluginHostResult<PluginInfo> {
        match self.send_request(PluginMethod::Initialize)? {
            PluginResult::Initialized(info) => {
                if info.protocol_version != PROTOCOL_VERSION {
                    return Err(PluginHostError::ProtocolMismatch {
                        expected: PROTOCOL_VERSION,
                        actual: info.protocol_version,
                    });
                }
                tracing::info!(
                    provider_id = %info.metadata.id,
                    provider_name = %info.metadata.name,
                    version = %info.metadata.version_name,
                    "plugin initialized"
                );
                Ok(info)
            }
            other => Err(PluginHostError::UnexpectedResponse {
                method: "Initialize",
                received: other.name(),
            }),
        }
    }
}

impl Drop for ExecPluginHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
