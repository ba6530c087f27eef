//! Owned handle for long-running transcoder children.
//!
//! A [`ManagedProcess`] owns exactly one child process. Dropping the handle
//! kills the child, so whoever holds it (a streaming response body, an HLS
//! job) bounds the process lifetime. Stderr is drained in the background into
//! a bounded tail used for error messages and hardware-failure detection.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::command::program_name;

/// Stderr lines retained per process.
const STDERR_TAIL_LINES: usize = 40;

/// Where the child's stdout goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutMode {
    /// Piped back to us (remux streaming).
    Piped,
    /// Discarded (output is written to files).
    Null,
}

#[derive(Debug)]
pub struct ManagedProcess {
    tool: String,
    child: Child,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
    exit: Option<ExitStatus>,
}

impl ManagedProcess {
    /// Spawn `program` with `args`.
    pub fn spawn(program: &Path, args: &[String], stdout: StdoutMode) -> rw_core::Result<Self> {
        let tool = program_name(program);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match stdout {
            StdoutMode::Piped => cmd.stdout(Stdio::piped()),
            StdoutMode::Null => cmd.stdout(Stdio::null()),
        };

        let mut child = cmd
            .spawn()
            .map_err(|e| rw_core::Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        tracing::debug!(tool = %tool, pid = ?child.id(), "Spawned transcoder process");

        Ok(Self {
            tool,
            child,
            stderr_tail,
            stderr_task,
            exit: None,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the piped stdout. Returns `None` when stdout was not piped or has
    /// already been taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking exit check.
    pub fn try_status(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => tracing::warn!(tool = %self.tool, error = %e, "try_wait failed"),
            }
        }
        self.exit
    }

    pub fn is_running(&mut self) -> bool {
        self.try_status().is_none()
    }

    /// Recent stderr output, oldest line first.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Kill the child and reap it.
    pub async fn kill(&mut self) {
        if self.try_status().is_some() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            tracing::warn!(tool = %self.tool, error = %e, "Failed to kill transcoder process");
        }
        self.exit = self.child.try_wait().ok().flatten();
        tracing::debug!(tool = %self.tool, "Killed transcoder process");
    }

    /// Wait for the child to exit.
    ///
    /// # Errors
    ///
    /// A non-zero exit becomes [`rw_core::Error::Tool`] carrying the stderr
    /// tail, so callers can test it with
    /// [`rw_core::Error::is_hw_related`].
    pub async fn wait(&mut self) -> rw_core::Result<()> {
        let status = match self.exit {
            Some(status) => status,
            None => {
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|e| rw_core::Error::tool(&self.tool, format!("wait failed: {e}")))?;
                self.exit = Some(status);
                status
            }
        };

        // Let the stderr reader catch up with the final lines.
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }

        if status.success() {
            Ok(())
        } else {
            Err(rw_core::Error::tool(
                &self.tool,
                format!("exited with status {status}: {}", self.stderr_tail()),
            ))
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            if let Ok(None) = self.child.try_wait() {
                let _ = self.child.start_kill();
                tracing::debug!(tool = %self.tool, "Transcoder handle dropped; child killed");
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn wait_reports_failure_with_stderr() {
        let Ok(mut proc) = ManagedProcess::spawn(
            &PathBuf::from("sh"),
            &sh("echo 'h264_nvenc: no capable devices' >&2; exit 3"),
            StdoutMode::Null,
        ) else {
            return;
        };
        let err = proc.wait().await.unwrap_err();
        assert!(err.to_string().contains("no capable devices"), "{err}");
        assert!(err.is_hw_related());
    }

    #[tokio::test]
    async fn kill_stops_running_child() {
        let Ok(mut proc) = ManagedProcess::spawn(&PathBuf::from("sleep"), &["30".into()], StdoutMode::Null) else {
            return;
        };
        assert!(proc.is_running());
        proc.kill().await;
        assert!(proc.wait().await.is_err());
    }

    #[tokio::test]
    async fn stdout_can_be_streamed() {
        use tokio::io::AsyncReadExt;
        let Ok(mut proc) = ManagedProcess::spawn(&PathBuf::from("sh"), &sh("printf abc"), StdoutMode::Piped) else {
            return;
        };
        let mut out = proc.take_stdout().unwrap();
        let mut buf = String::new();
        out.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "abc");
        proc.wait().await.unwrap();
    }
}
