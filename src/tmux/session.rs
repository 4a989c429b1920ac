use anyhow::anyhow;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::client::{TmuxPane, CAPTURE_HISTORY};
use super::detector::{await_reply, CompletionDetector, PollOutcome, POLL_INTERVAL};
use super::extractor::extract;
use super::heuristics::{AgentStatus, StateInferenceEngine};
use super::markers::{self, MarkerKind};
use super::permission::PermissionPolicy;
use super::{Pane, TmuxClient, TmuxSession};
use crate::context::RequestContext;
use crate::error::{BridgeError, BridgeResult};

/// How long a fresh Gemini process gets to show its prompt
const STARTUP_BUDGET: Duration = Duration::from_secs(30);
const STARTUP_POLL: Duration = Duration::from_millis(500);

/// Pause between typing a message and pressing Enter
const ENTER_DELAY: Duration = Duration::from_millis(100);

/// Time for `/clear` to take effect before recounting
const CLEAR_SETTLE: Duration = Duration::from_millis(1500);

struct ActiveSession {
    info: TmuxSession,
    workdir: PathBuf,
    messages_sent: u32,
}

/// A message exchange over the tmux session
#[derive(Debug, Clone)]
pub struct SessionReply {
    pub reply: String,
    pub outcome: PollOutcome,
}

/// Snapshot of the session for the status tool
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub transport: &'static str,
    pub session: String,
    pub alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    /// tmux clients currently attached, e.g. a user watching the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_clients: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    pub messages_sent: u32,
    pub message_count: usize,
    pub activity: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attach_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl SessionStatus {
    fn apply_info(&mut self, info: &TmuxSession) {
        self.session_id = Some(info.id.clone());
        self.created_at = Some(info.created_at);
        self.attached_clients = Some(info.attached_clients);
    }
}

/// Message counts around a `/clear`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClearReport {
    pub alive: bool,
    pub messages_before: usize,
    pub messages_after: usize,
}

/// Gemini running interactively inside one named tmux session
pub struct SessionTransport {
    client: TmuxClient,
    name: String,
    program: String,
    args: Vec<String>,
    active: Option<ActiveSession>,
}

impl SessionTransport {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            client: TmuxClient::new(),
            name: name.into(),
            program: program.into(),
            args,
            active: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kill a session left behind by an earlier run. Returns whether one existed.
    pub async fn cleanup_stale(&mut self) -> anyhow::Result<bool> {
        self.active = None;
        if !self.client.has_session(&self.name).await {
            return Ok(false);
        }
        info!(session = %self.name, "Killing stale session");
        self.client.kill_session(&self.name).await?;
        Ok(true)
    }

    /// Type `message` into Gemini and wait for the reply
    pub async fn send(
        &mut self,
        message: &str,
        workdir: &Path,
        budget: Duration,
        policy: PermissionPolicy,
        ctx: &mut RequestContext,
    ) -> BridgeResult<SessionReply> {
        self.ensure(workdir, ctx).await?;

        // A raw newline would submit the first line on its own
        let typed = message.replace(['\r', '\n'], " ");

        let outcome = {
            let mut pane = TmuxPane::new(&self.client, &self.name);
            let baseline = pane.capture(ctx).await.unwrap_or_else(|e| {
                warn!(request = ctx.id(), "Baseline capture failed: {:#}", e);
                String::new()
            });
            let mut detector = CompletionDetector::new(&baseline);

            ctx.record_command(self.client.describe(&["send-keys", "-t", &self.name, "-l", "<message>"]));
            self.client.send_literal(&self.name, &typed).await?;
            tokio::time::sleep(ENTER_DELAY).await;
            pane.send_key("Enter", ctx).await?;
            ctx.mark("message_sent");

            await_reply(&mut pane, &mut detector, budget, policy, POLL_INTERVAL, ctx).await
        };

        let reply = extract(&outcome.snapshot, &typed);
        ctx.mark("reply_extracted");
        if let Some(active) = self.active.as_mut() {
            active.messages_sent += 1;
        }

        Ok(SessionReply { reply, outcome })
    }

    pub async fn status(
        &mut self,
        tail_lines: Option<usize>,
        full_transcript: bool,
        ctx: &mut RequestContext,
    ) -> SessionStatus {
        let alive = self.client.has_session(&self.name).await;
        if !alive {
            self.active = None;
        }

        let mut status = SessionStatus {
            transport: "session",
            session: self.name.clone(),
            alive,
            session_id: None,
            created_at: None,
            attached_clients: None,
            working_directory: None,
            messages_sent: 0,
            message_count: 0,
            activity: AgentStatus::Unknown,
            attach_command: None,
            transcript: None,
        };
        if !alive {
            return status;
        }

        // Attached clients come and go, so always ask tmux
        match self.client.session_info(&self.name).await {
            Ok(Some(info)) => status.apply_info(&info),
            Ok(None) => {}
            Err(e) => warn!(request = ctx.id(), "Session lookup failed: {:#}", e),
        }
        if let Some(active) = &self.active {
            status.session_id = Some(active.info.id.clone());
            status.created_at = Some(active.info.created_at);
            status.working_directory = Some(active.workdir.display().to_string());
            status.messages_sent = active.messages_sent;
        }
        status.attach_command = Some(self.client.attach_command(&self.name).join(" "));

        let mut pane = TmuxPane::new(&self.client, &self.name);
        match pane.capture(ctx).await {
            Ok(transcript) => {
                status.message_count = markers::approximate_message_count(&transcript);
                status.activity = StateInferenceEngine::analyze(&transcript);
                let trimmed = transcript.trim_end();
                if full_transcript {
                    status.transcript = Some(trimmed.to_string());
                } else if let Some(n) = tail_lines {
                    status.transcript = Some(tail(trimmed, n));
                }
            }
            Err(e) => warn!(request = ctx.id(), "Status capture failed: {:#}", e),
        }

        status
    }

    /// Send `/clear` and report message counts before and after
    pub async fn clear(&mut self, ctx: &mut RequestContext) -> BridgeResult<ClearReport> {
        if !self.client.has_session(&self.name).await {
            self.active = None;
            return Ok(ClearReport {
                alive: false,
                messages_before: 0,
                messages_after: 0,
            });
        }

        let mut pane = TmuxPane::new(&self.client, &self.name);
        let before = pane.capture(ctx).await?;

        ctx.record_command(self.client.describe(&["send-keys", "-t", &self.name, "-l", "/clear"]));
        self.client.send_literal(&self.name, "/clear").await?;
        tokio::time::sleep(ENTER_DELAY).await;
        pane.send_key("Enter", ctx).await?;
        tokio::time::sleep(CLEAR_SETTLE).await;

        let after = pane.capture(ctx).await?;
        Ok(ClearReport {
            alive: true,
            messages_before: markers::approximate_message_count(&before),
            messages_after: markers::approximate_message_count(&after),
        })
    }

    /// Kill the session. Returns whether one was running.
    pub async fn close(&mut self, ctx: &mut RequestContext) -> BridgeResult<bool> {
        self.active = None;
        if !self.client.has_session(&self.name).await {
            return Ok(false);
        }
        ctx.record_command(self.client.describe(&["kill-session", "-t", &self.name]));
        self.client.kill_session(&self.name).await?;
        info!(session = %self.name, "Session closed");
        Ok(true)
    }

    /// Make sure the session exists, creating it in `workdir` if needed
    async fn ensure(&mut self, workdir: &Path, ctx: &mut RequestContext) -> BridgeResult<()> {
        if self.client.has_session(&self.name).await {
            if self.active.is_none() {
                if let Some(info) = self.client.session_info(&self.name).await? {
                    self.active = Some(ActiveSession {
                        info,
                        workdir: workdir.to_path_buf(),
                        messages_sent: 0,
                    });
                }
            } else if let Some(active) = &self.active {
                if active.workdir != workdir {
                    warn!(
                        session = %self.name,
                        running_in = %active.workdir.display(),
                        requested = %workdir.display(),
                        "Session already runs in another directory; close it to switch"
                    );
                }
            }
            return Ok(());
        }

        self.active = None;
        let program = which::which(&self.program).map_err(|_| BridgeError::BinaryNotFound {
            binary: self.program.clone(),
        })?;

        info!(session = %self.name, workdir = %workdir.display(), "Starting Gemini session");
        ctx.record_command(self.client.describe(&["new-session", "-d", "-s", &self.name]));
        let info = self
            .client
            .create_session(&self.name, workdir, &program, &self.args)
            .await?;
        self.active = Some(ActiveSession {
            info,
            workdir: workdir.to_path_buf(),
            messages_sent: 0,
        });

        self.wait_until_ready(ctx).await?;
        ctx.mark("session_ready");
        Ok(())
    }

    /// Wait for Gemini to draw its input prompt
    async fn wait_until_ready(&self, ctx: &mut RequestContext) -> BridgeResult<()> {
        let started = Instant::now();
        while started.elapsed() < STARTUP_BUDGET {
            tokio::time::sleep(STARTUP_POLL).await;
            if !self.client.has_session(&self.name).await {
                return Err(BridgeError::Transport(anyhow!(
                    "{} exited during startup",
                    self.program
                )));
            }
            match self.client.capture_pane(&self.name, CAPTURE_HISTORY).await {
                Ok(screen) => {
                    let tail = markers::live_tail(&screen);
                    let ready = markers::any_line(MarkerKind::PromptToken, tail.iter().copied())
                        && !tail.iter().any(|line| markers::is_live_status(line));
                    if ready {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(request = ctx.id(), "Startup capture failed: {:#}", e);
                    ctx.note_missed_poll();
                }
            }
        }
        warn!(session = %self.name, "Gemini prompt not seen after {:?}; sending anyway", STARTUP_BUDGET);
        Ok(())
    }
}

/// Last `n` lines of `text`
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
