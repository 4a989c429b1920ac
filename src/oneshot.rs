//! One-shot transport: spawn Gemini per message and read its stdout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::{BridgeError, BridgeResult};

/// Line the Gemini CLI prints before every non-interactive answer
const CREDENTIALS_BOILERPLATE: &str = "Loaded cached credentials.";

/// Grace period for the child to exit after stdout closes
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// What one invocation produced
#[derive(Debug, Clone, Default)]
pub struct OneShotOutput {
    /// Stdout with boilerplate removed and trailing whitespace trimmed
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Killed after the idle window passed with no output
    pub idle_killed: bool,
    /// Killed because the request's time budget ran out
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct OneShotTransport {
    program: String,
    args: Vec<String>,
    idle_timeout: Duration,
}

impl OneShotTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>, idle_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            idle_timeout,
        }
    }

    /// Run the program once with `message` on stdin.
    ///
    /// Output is collected until the child exits, stays silent for the idle
    /// window, or `budget` runs out; the last two kill the child and return
    /// whatever arrived.
    pub async fn run(
        &self,
        message: &str,
        workdir: &Path,
        budget: Duration,
        ctx: &mut RequestContext,
    ) -> BridgeResult<OneShotOutput> {
        let program = which::which(&self.program).map_err(|_| BridgeError::BinaryNotFound {
            binary: self.program.clone(),
        })?;

        ctx.record_command(format!("{} {}", program.display(), self.args.join(" ")));
        let mut child = Command::new(&program)
            .args(&self.args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    BridgeError::BinaryNotFound {
                        binary: self.program.clone(),
                    }
                } else {
                    BridgeError::Spawn {
                        binary: self.program.clone(),
                        source,
                    }
                }
            })?;
        ctx.mark("spawned");

        // Fed concurrently with the stdout loop; a child that echoes while it
        // reads would otherwise fill both pipes. Dropping stdin closes it.
        let stdin_task = child.stdin.take().map(|mut stdin| {
            let payload = format!("{}\n", message);
            tokio::spawn(async move { stdin.write_all(payload.as_bytes()).await })
        });

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let mut output = OneShotOutput::default();
        let mut collected = Vec::new();
        let deadline = Instant::now() + budget;

        if let Some(mut stdout) = child.stdout.take() {
            let mut buf = [0u8; 4096];
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    output.timed_out = true;
                    break;
                }
                let window = self.idle_timeout.min(remaining);
                match timeout(window, stdout.read(&mut buf)).await {
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
                    Ok(Err(e)) => {
                        warn!(request = ctx.id(), "Reading stdout failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        if window < self.idle_timeout {
                            output.timed_out = true;
                        } else {
                            output.idle_killed = true;
                        }
                        break;
                    }
                }
            }
        }

        if output.idle_killed || output.timed_out {
            info!(
                request = ctx.id(),
                idle = output.idle_killed,
                "Terminating {} after {:?}",
                self.program,
                ctx.elapsed()
            );
            if let Err(e) = child.kill().await {
                warn!(request = ctx.id(), "Failed to kill child: {}", e);
            }
        } else {
            match timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => output.exit_code = status.code(),
                Ok(Err(e)) => warn!(request = ctx.id(), "Waiting for child failed: {}", e),
                Err(_) => {
                    warn!(request = ctx.id(), "Child closed stdout but did not exit; killing it");
                    let _ = child.kill().await;
                }
            }
        }
        ctx.mark("child_finished");

        if let Some(task) = stdin_task {
            if !task.is_finished() {
                task.abort();
            }
            match task.await {
                Ok(Err(e)) => {
                    // The child may exit before reading its input
                    warn!(request = ctx.id(), "Failed to write message to stdin: {}", e)
                }
                Err(e) if !e.is_cancelled() => {
                    warn!(request = ctx.id(), "Stdin writer failed: {}", e)
                }
                _ => {}
            }
        }

        if let Some(task) = stderr_task {
            if let Ok(Ok(buf)) = timeout(Duration::from_secs(1), task).await {
                output.stderr = String::from_utf8_lossy(&buf).trim().to_string();
            }
        }

        output.stdout = strip_boilerplate(&String::from_utf8_lossy(&collected));
        debug!(
            request = ctx.id(),
            bytes = collected.len(),
            exit_code = ?output.exit_code,
            "One-shot run finished"
        );
        Ok(output)
    }
}

/// Drop the credentials notice and trailing whitespace
pub fn strip_boilerplate(raw: &str) -> String {
    raw.lines()
        .filter(|line| line.trim() != CREDENTIALS_BOILERPLATE)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(program: &str, args: &[&str], idle: Duration) -> OneShotTransport {
        OneShotTransport::new(program, args.iter().map(|s| s.to_string()).collect(), idle)
    }

    #[test]
    fn test_strip_boilerplate() {
        let raw = "Loaded cached credentials.\nThe answer is 42.\n\n";
        assert_eq!(strip_boilerplate(raw), "The answer is 42.");
        assert_eq!(strip_boilerplate("Loaded cached credentials.\n"), "");
        assert_eq!(strip_boilerplate("line one\n  indented\n"), "line one\n  indented");
    }

    #[tokio::test]
    async fn test_echoes_message_through_cat() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RequestContext::new("test");
        let output = transport("cat", &[], Duration::from_secs(5))
            .run("hello from the bridge", dir.path(), Duration::from_secs(10), &mut ctx)
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello from the bridge");
        assert_eq!(output.exit_code, Some(0));
        assert!(!output.idle_killed);
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_large_message_through_echoing_child() {
        // Larger than both pipe buffers combined
        let message = "a".repeat(1 << 20);
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RequestContext::new("test");
        let output = tokio::time::timeout(
            Duration::from_secs(20),
            transport("cat", &[], Duration::from_secs(5)).run(
                &message,
                dir.path(),
                Duration::from_secs(10),
                &mut ctx,
            ),
        )
        .await
        .expect("one-shot run hung on a full pipe")
        .unwrap();
        assert_eq!(output.stdout.len(), message.len());
        assert!(!output.idle_killed);
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_strips_credentials_line_from_child_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RequestContext::new("test");
        let output = transport(
            "sh",
            &["-c", "echo 'Loaded cached credentials.'; cat"],
            Duration::from_secs(5),
        )
        .run("answer", dir.path(), Duration::from_secs(10), &mut ctx)
        .await
        .unwrap();
        assert_eq!(output.stdout, "answer");
    }

    #[tokio::test]
    async fn test_silent_child_is_killed_after_idle_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RequestContext::new("test");
        let started = std::time::Instant::now();
        let output = transport("sleep", &["30"], Duration::from_millis(300))
            .run("ignored", dir.path(), Duration::from_secs(20), &mut ctx)
            .await
            .unwrap();
        assert!(output.idle_killed);
        assert!(!output.timed_out);
        assert_eq!(output.stdout, "");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_partial_output_survives_idle_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RequestContext::new("test");
        let output = transport("sh", &["-c", "echo partial; sleep 30"], Duration::from_millis(500))
            .run("ignored", dir.path(), Duration::from_secs(20), &mut ctx)
            .await
            .unwrap();
        assert!(output.idle_killed);
        assert_eq!(output.stdout, "partial");
    }

    #[tokio::test]
    async fn test_budget_shorter_than_idle_window_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RequestContext::new("test");
        let output = transport("sleep", &["30"], Duration::from_secs(60))
            .run("ignored", dir.path(), Duration::from_millis(200), &mut ctx)
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(!output.idle_killed);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RequestContext::new("test");
        let err = transport("no-such-gemini-binary-xyz", &[], Duration::from_secs(1))
            .run("hi", dir.path(), Duration::from_secs(1), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::BinaryNotFound { .. }));
    }
}
