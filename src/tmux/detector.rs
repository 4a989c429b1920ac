//! Reply completion detection for the tmux transport.
//!
//! Gemini gives no signal when it finishes a reply, so the pane is captured
//! once per [`POLL_INTERVAL`] and the [`CompletionDetector`] decides from the
//! sequence of snapshots whether the reply is done.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::markers::{self, MarkerKind};
use super::permission::PermissionPolicy;
use super::Pane;
use crate::context::RequestContext;

/// Time between pane captures
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive identical captures required before a reply counts as finished
pub const STABLE_THRESHOLD: u32 = 3;

/// Permission prompts answered per request before the loop stops answering
const MAX_PROMPTS_PER_REQUEST: u32 = 10;

/// Verdict for one observed snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The reply finished and the screen settled
    Complete,
    /// Still waiting
    Pending,
    /// The time budget ran out first
    TimedOut,
    /// Gemini is blocked on a yes/no confirmation
    PermissionPrompt,
}

/// Accumulated state of one request's polling loop
#[derive(Debug)]
pub struct CompletionDetector {
    previous: Option<String>,
    /// `previous` with spinner and status lines removed
    fingerprint: Option<String>,
    stable_count: u32,
    processing_seen: bool,
    reply_seen: bool,
    baseline_replies: usize,
    acknowledged_prompts: usize,
    last_change: Duration,
    completed: bool,
}

impl CompletionDetector {
    /// Start detection against the pane content captured before sending.
    ///
    /// Reply markers and permission prompts already in `baseline` belong to
    /// earlier exchanges and are ignored.
    pub fn new(baseline: &str) -> Self {
        Self {
            previous: None,
            fingerprint: None,
            stable_count: 0,
            processing_seen: false,
            reply_seen: false,
            baseline_replies: markers::count_lines(MarkerKind::ReplyStart, baseline),
            acknowledged_prompts: markers::count_lines(MarkerKind::PermissionPrompt, baseline),
            last_change: Duration::ZERO,
            completed: false,
        }
    }

    /// Feed one snapshot taken `elapsed` after the message was sent
    pub fn observe(&mut self, snapshot: &str, elapsed: Duration, budget: Duration) -> CompletionStatus {
        if self.completed {
            return CompletionStatus::Complete;
        }

        // The first capture of a settled screen counts toward the threshold
        let fingerprint = fingerprint(snapshot);
        if self.fingerprint.as_deref() == Some(fingerprint.as_str()) {
            self.stable_count += 1;
        } else {
            self.stable_count = 1;
            self.fingerprint = Some(fingerprint);
            self.last_change = elapsed;
        }
        self.previous = Some(snapshot.to_string());

        let busy = markers::shows_activity(snapshot);
        if busy {
            self.processing_seen = true;
        }
        if markers::count_lines(MarkerKind::ReplyStart, snapshot) > self.baseline_replies {
            self.reply_seen = true;
        }

        let prompts = markers::count_lines(MarkerKind::PermissionPrompt, snapshot);
        if prompts < self.acknowledged_prompts {
            // Answered dialogs vanish once Gemini redraws
            self.acknowledged_prompts = prompts;
        }
        if prompts > self.acknowledged_prompts {
            return CompletionStatus::PermissionPrompt;
        }

        if self.stable_count >= STABLE_THRESHOLD && self.processing_seen && !busy {
            self.completed = true;
            return CompletionStatus::Complete;
        }

        if elapsed >= budget {
            return CompletionStatus::TimedOut;
        }

        CompletionStatus::Pending
    }

    /// Mark every prompt in the latest snapshot as answered
    pub fn acknowledge_prompt(&mut self) {
        let current = self
            .previous
            .as_deref()
            .map(|s| markers::count_lines(MarkerKind::PermissionPrompt, s))
            .unwrap_or(0);
        self.acknowledged_prompts = current.max(self.acknowledged_prompts + 1);
        self.stable_count = 0;
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn processing_seen(&self) -> bool {
        self.processing_seen
    }

    /// Whether a new reply-start marker appeared since the baseline
    pub fn reply_seen(&self) -> bool {
        self.reply_seen
    }

    /// How long the screen has been unchanged as of `elapsed`
    pub fn quiet_for(&self, elapsed: Duration) -> Duration {
        elapsed.saturating_sub(self.last_change)
    }

    pub fn last_snapshot(&self) -> &str {
        self.previous.as_deref().unwrap_or("")
    }
}

/// Snapshot text without spinner and status lines, so a redrawn spinner
/// frame does not count as new content
fn fingerprint(snapshot: &str) -> String {
    snapshot
        .lines()
        .filter(|line| !markers::is_live_status(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of a polling loop
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Either [`CompletionStatus::Complete`] or [`CompletionStatus::TimedOut`]
    pub status: CompletionStatus,
    pub snapshot: String,
    pub elapsed: Duration,
    pub prompts_answered: u32,
    pub reply_seen: bool,
}

/// Poll `pane` until the detector reports completion or the budget runs out.
///
/// Permission prompts are answered with `policy` and polling resumes. Capture
/// failures count as missed polls. The loop always ends with a snapshot,
/// never an error.
pub async fn await_reply<P: Pane + ?Sized>(
    pane: &mut P,
    detector: &mut CompletionDetector,
    budget: Duration,
    policy: PermissionPolicy,
    interval: Duration,
    ctx: &mut RequestContext,
) -> PollOutcome {
    let started = Instant::now();
    let mut prompts_answered = 0;

    loop {
        tokio::time::sleep(interval).await;
        let elapsed = started.elapsed();

        let status = match pane.capture(ctx).await {
            Ok(snapshot) => detector.observe(&snapshot, elapsed, budget),
            Err(e) => {
                warn!(request = ctx.id(), "Pane capture failed: {:#}", e);
                ctx.note_missed_poll();
                if elapsed >= budget {
                    CompletionStatus::TimedOut
                } else {
                    CompletionStatus::Pending
                }
            }
        };

        debug!(
            request = ctx.id(),
            ?status,
            stable = detector.stable_count(),
            processing_seen = detector.processing_seen(),
            quiet_ms = detector.quiet_for(elapsed).as_millis() as u64,
            "poll"
        );

        match status {
            CompletionStatus::Complete => {
                ctx.mark("reply_complete");
                return finished(status, detector, elapsed, prompts_answered);
            }
            CompletionStatus::TimedOut => {
                ctx.mark("reply_timed_out");
                return finished(status, detector, elapsed, prompts_answered);
            }
            CompletionStatus::PermissionPrompt if elapsed >= budget => {
                info!(request = ctx.id(), "Budget exhausted while a permission prompt was pending");
                ctx.mark("reply_timed_out");
                return finished(CompletionStatus::TimedOut, detector, elapsed, prompts_answered);
            }
            CompletionStatus::PermissionPrompt => {
                if prompts_answered >= MAX_PROMPTS_PER_REQUEST {
                    continue;
                }
                match policy.respond(pane, ctx).await {
                    Ok(()) => {
                        prompts_answered += 1;
                        detector.acknowledge_prompt();
                    }
                    Err(e) => {
                        warn!(request = ctx.id(), "Failed to answer permission prompt: {:#}", e)
                    }
                }
            }
            CompletionStatus::Pending => {}
        }
    }
}

fn finished(
    status: CompletionStatus,
    detector: &CompletionDetector,
    elapsed: Duration,
    prompts_answered: u32,
) -> PollOutcome {
    PollOutcome {
        status,
        snapshot: detector.last_snapshot().to_string(),
        elapsed,
        prompts_answered,
        reply_seen: detector.reply_seen(),
    }
}
