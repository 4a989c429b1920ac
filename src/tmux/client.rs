use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;

use super::{Pane, TmuxSession};
use crate::context::RequestContext;

/// Pane width used for new sessions; wide enough that most replies don't wrap
const PANE_WIDTH: &str = "220";
const PANE_HEIGHT: &str = "50";

/// Client for interacting with tmux via CLI
#[derive(Debug, Clone)]
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    /// Check if a session with the given name exists
    pub async fn has_session(&self, name: &str) -> bool {
        Command::new(&self.tmux_path)
            .args(["has-session", "-t", &exact_target(name)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Look up a session by name
    pub async fn session_info(&self, name: &str) -> Result<Option<TmuxSession>> {
        // Format: session_id|session_name|session_created|session_attached
        let output = Command::new(&self.tmux_path)
            .args([
                "list-sessions",
                "-F",
                "#{session_id}|#{session_name}|#{session_created}|#{session_attached}",
            ])
            .output()
            .await
            .context("Failed to execute tmux list-sessions")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("no sessions") {
                return Ok(None);
            }
            anyhow::bail!("tmux list-sessions failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(parse_session_line)
            .find(|session| session.name == name))
    }

    /// Create a detached session running `program` in `workdir`
    pub async fn create_session(
        &self,
        name: &str,
        workdir: &Path,
        program: &Path,
        args: &[String],
    ) -> Result<TmuxSession> {
        let workdir = workdir.to_string_lossy().into_owned();
        let program = program.to_string_lossy().into_owned();
        let mut argv: Vec<&str> = vec![
            "new-session",
            "-d",
            "-s",
            name,
            "-c",
            workdir.as_str(),
            "-x",
            PANE_WIDTH,
            "-y",
            PANE_HEIGHT,
            program.as_str(),
        ];
        argv.extend(args.iter().map(String::as_str));

        self.run(&argv)
            .await
            .with_context(|| format!("Failed to create session '{}'", name))?;

        self.session_info(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Session created but not found"))
    }

    /// Type text into the pane without interpreting key names
    pub async fn send_literal(&self, target: &str, text: &str) -> Result<()> {
        self.run(&["send-keys", "-t", &pane_target(target), "-l", "--", text])
            .await
            .context("Failed to send text")?;
        Ok(())
    }

    /// Press a named key ("Enter", "Down", "Escape", ...)
    pub async fn send_key(&self, target: &str, key: &str) -> Result<()> {
        self.run(&["send-keys", "-t", &pane_target(target), key])
            .await
            .with_context(|| format!("Failed to send key {}", key))?;
        Ok(())
    }

    /// Capture pane text including `history` lines of scrollback
    pub async fn capture_pane(&self, target: &str, history: usize) -> Result<String> {
        let start = format!("-{}", history);
        let output = self
            .run(&["capture-pane", "-p", "-t", &pane_target(target), "-S", &start])
            .await
            .context("Failed to capture pane")?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Kill a session
    pub async fn kill_session(&self, session_id: &str) -> Result<()> {
        self.run(&["kill-session", "-t", &exact_target(session_id)])
            .await
            .context("Failed to kill tmux session")?;
        Ok(())
    }

    /// Get the command to attach to a session (for external execution)
    pub fn attach_command(&self, session_id: &str) -> Vec<String> {
        vec![
            self.tmux_path.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            session_id.to_string(),
        ]
    }

    /// Human-readable form of a tmux invocation, for request logs
    pub fn describe(&self, args: &[&str]) -> String {
        let mut line = self.tmux_path.clone();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new(&self.tmux_path)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.describe(args)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} failed: {}", self.describe(args), stderr.trim());
        }

        Ok(output)
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

/// `=name` makes tmux match the session name exactly instead of by prefix
fn exact_target(name: &str) -> String {
    if name.starts_with('$') || name.starts_with('%') || name.starts_with('=') {
        name.to_string()
    } else {
        format!("={}", name)
    }
}

/// Active pane of the exactly-named session
fn pane_target(name: &str) -> String {
    if name.starts_with('%') {
        name.to_string()
    } else {
        format!("{}:", exact_target(name))
    }
}

fn parse_session_line(line: &str) -> Option<TmuxSession> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 4 {
        return None;
    }

    let mut session = TmuxSession::new(parts[0].to_string(), parts[1].to_string());
    session.created_at = parts[2].parse().unwrap_or(0);
    session.attached_clients = parts[3].parse().unwrap_or(0);
    Some(session)
}

/// Scrollback lines captured with every snapshot
pub const CAPTURE_HISTORY: usize = 2000;

/// A [`Pane`] backed by a live tmux session
pub struct TmuxPane<'a> {
    client: &'a TmuxClient,
    target: &'a str,
}

impl<'a> TmuxPane<'a> {
    pub fn new(client: &'a TmuxClient, target: &'a str) -> Self {
        Self { client, target }
    }
}

#[async_trait]
impl Pane for TmuxPane<'_> {
    async fn capture(&mut self, ctx: &mut RequestContext) -> Result<String> {
        ctx.record_command(self.client.describe(&["capture-pane", "-p", "-t", self.target]));
        self.client.capture_pane(self.target, CAPTURE_HISTORY).await
    }

    async fn send_key(&mut self, key: &str, ctx: &mut RequestContext) -> Result<()> {
        ctx.record_command(self.client.describe(&["send-keys", "-t", self.target, key]));
        self.client.send_key(self.target, key).await
    }
}
