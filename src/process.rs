//! Subprocess runner — spawns and supervises the external capture tool.
//!
//! The recorder consumes a child process through two channels:
//!
//! ```text
//!                 ┌────────────── SpawnedProcess ──────────────┐
//! child stderr ──→│ log_lines : mpsc::Receiver<String>         │──→ boundary scan
//! child exit  ──→│ exit      : oneshot::Receiver<ExitOutcome> │──→ lifecycle task
//!                 └────────────────────────────────────────────┘
//! ```
//!
//! Cancellation of the token starts cooperative termination: `q` is written
//! to the child's stdin (the segmenter's graceful-quit convention), and the
//! child is killed outright if it has not exited within a bounded wait.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{NvrError, Result};

/// How long a canceled child gets to quit before being killed.
const GRACEFUL_EXIT_WAIT: Duration = Duration::from_secs(5);

/// Buffered log lines before the reader applies backpressure.
const LOG_CHANNEL_BOUND: usize = 256;

/// Terminal state of a supervised child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    /// Exit code, if the child exited normally.
    pub code: Option<i32>,
}

/// Handle to a running child process.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Stderr lines, in order. Closes when the child exits.
    pub log_lines: mpsc::Receiver<String>,
    /// Resolves exactly once with the child's exit outcome.
    pub exit: oneshot::Receiver<ExitOutcome>,
}

/// Spawns the external media tool and exposes its log stream.
#[async_trait]
pub trait SubprocessRunner: Send + Sync {
    /// Spawn `argv` and return its handle. Cancellation of `token`
    /// initiates cooperative termination.
    async fn start(&self, argv: &[String], token: CancellationToken) -> Result<SpawnedProcess>;
}

/// [`SubprocessRunner`] backed by `tokio::process`.
#[derive(Debug, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubprocessRunner for CommandRunner {
    async fn start(&self, argv: &[String], token: CancellationToken) -> Result<SpawnedProcess> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| NvrError::InvalidArgument("empty argv".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child.stderr.take().ok_or_else(|| {
            NvrError::Internal("child spawned without a stderr pipe".into())
        })?;
        let mut stdin = child.stdin.take();

        let (line_tx, line_rx) = mpsc::channel::<String>(LOG_CHANNEL_BOUND);
        let (exit_tx, exit_rx) = oneshot::channel::<ExitOutcome>();

        // Stderr pump: forward lines until the pipe closes.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        // Lifecycle: await exit, or terminate cooperatively on cancellation.
        tokio::spawn(async move {
            let mut exited = None;
            tokio::select! {
                status = child.wait() => exited = Some(status),
                _ = token.cancelled() => {}
            }
            let status = match exited {
                Some(status) => status,
                None => {
                    if let Some(stdin) = stdin.as_mut() {
                        // Graceful quit request; ignore a closed pipe.
                        let _ = stdin.write_all(b"q\n").await;
                        let _ = stdin.flush().await;
                    }
                    match tokio::time::timeout(GRACEFUL_EXIT_WAIT, child.wait()).await {
                        Ok(status) => status,
                        Err(_) => {
                            warn!("child ignored quit request, killing");
                            let _ = child.kill().await;
                            child.wait().await
                        }
                    }
                }
            };

            let outcome = match status {
                Ok(status) => ExitOutcome { success: status.success(), code: status.code() },
                Err(e) => {
                    warn!(error = %e, "failed to reap child");
                    ExitOutcome { success: false, code: None }
                }
            };
            debug!(success = outcome.success, code = ?outcome.code, "child exited");
            let _ = exit_tx.send(outcome);
        });

        Ok(SpawnedProcess { log_lines: line_rx, exit: exit_rx })
    }
}
