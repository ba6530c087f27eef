//! One-shot ffmpeg/ffprobe invocations.
//!
//! [`ToolCommand`] covers the short-lived runs: probes, encoder listings,
//! subtitle extraction and single-segment renders. Output is collected in
//! full, so it is not suitable for streaming children; those go through
//! [`crate::process::ManagedProcess`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Longest stderr excerpt carried into an error message. ffmpeg prints the
/// useful line last, so the tail is kept.
const STDERR_EXCERPT: usize = 2048;

/// What a successful run printed.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// A bounded run of an external tool.
///
/// ```no_run
/// use std::time::Duration;
/// use rw_av::ToolCommand;
///
/// # async fn example() -> rw_core::Result<()> {
/// let listing = ToolCommand::new("ffmpeg", Duration::from_secs(15))
///     .with_args(["-hide_banner", "-encoders"])
///     .run()
///     .await?;
/// assert!(listing.stdout.contains("libx264"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    limit: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, limit: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            limit,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion.
    ///
    /// # Errors
    ///
    /// [`rw_core::Error::Tool`] when the program cannot be started, exits
    /// non-zero (the message ends with the tail of stderr, which is what
    /// [`rw_core::Error::is_hw_related`] inspects), or outlives its limit.
    /// An overdue child is killed.
    pub async fn run(&self) -> rw_core::Result<ToolOutput> {
        let tool = program_name(&self.program);
        let started = Instant::now();

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| rw_core::Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let output = match tokio::time::timeout(self.limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(rw_core::Error::tool(tool, format!("wait failed: {e}"))),
            Err(_) => {
                tracing::warn!(tool = %tool, limit_secs = self.limit.as_secs_f64(), "Tool run timed out; killed");
                return Err(rw_core::Error::tool(tool, format!("timed out after {:?}", self.limit)));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(rw_core::Error::tool(
                tool,
                format!("{}: {}", output.status, stderr_excerpt(&stderr)),
            ));
        }

        let elapsed = started.elapsed();
        tracing::trace!(tool = %tool, elapsed_ms = elapsed.as_millis() as u64, "Tool run finished");
        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            elapsed,
        })
    }
}

/// File name of a program path, for log fields and error messages.
pub(crate) fn program_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or(program.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Last [`STDERR_EXCERPT`] bytes of stderr, cut on a char boundary.
pub(crate) fn stderr_excerpt(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    let mut start = trimmed.len().saturating_sub(STDERR_EXCERPT);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn collects_stdout() {
        let out = ToolCommand::new("sh", SHORT)
            .with_args(["-c", "echo encoders; echo note >&2"])
            .run()
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "encoders");
        assert_eq!(out.stderr.trim(), "note");
    }

    #[tokio::test]
    async fn failure_carries_stderr_tail() {
        let err = ToolCommand::new("sh", SHORT)
            .with_args(["-c", "echo 'Cannot load libcuda.so.1' >&2; exit 1"])
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tool_error");
        assert!(err.to_string().contains("libcuda"));
        assert!(err.is_hw_related());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = ToolCommand::new("/nonexistent/ffmpeg-xyz", SHORT).run().await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
        assert!(err.to_string().contains("ffmpeg-xyz"));
    }

    #[tokio::test]
    async fn overdue_run_is_killed() {
        let err = ToolCommand::new("sleep", Duration::from_millis(100))
            .with_arg("10")
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn excerpt_keeps_tail() {
        let long = format!("{}END", "x".repeat(5000));
        let excerpt = stderr_excerpt(&long);
        assert_eq!(excerpt.len(), STDERR_EXCERPT);
        assert!(excerpt.ends_with("END"));
        assert_eq!(stderr_excerpt("  short \n"), "short");
        assert_eq!(program_name(Path::new("/usr/bin/ffprobe")), "ffprobe");
    }
}
