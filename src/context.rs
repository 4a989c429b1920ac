use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// An external command issued on behalf of a request
#[derive(Debug, Clone)]
pub struct CommandRecord {
    /// Offset from the start of the request
    pub at: Duration,
    pub command: String,
}

/// A named point in a request's lifetime
#[derive(Debug, Clone)]
pub struct Timing {
    pub label: &'static str,
    pub at: Duration,
}

/// Debug bookkeeping for one tool call.
///
/// Created per call and handed down explicitly, so nothing recorded for one
/// request can show up in the next.
#[derive(Debug)]
pub struct RequestContext {
    id: u64,
    tool: String,
    started: Instant,
    commands: Vec<CommandRecord>,
    timings: Vec<Timing>,
    missed_polls: u32,
}

impl RequestContext {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            tool: tool.into(),
            started: Instant::now(),
            commands: Vec::new(),
            timings: Vec::new(),
            missed_polls: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log an external command before it runs
    pub fn record_command(&mut self, command: impl Into<String>) {
        let command = command.into();
        debug!(request = self.id, %command, "exec");
        self.commands.push(CommandRecord {
            at: self.elapsed(),
            command,
        });
    }

    pub fn mark(&mut self, label: &'static str) {
        self.timings.push(Timing {
            label,
            at: self.elapsed(),
        });
    }

    /// A capture that failed inside the polling loop
    pub fn note_missed_poll(&mut self) {
        self.missed_polls += 1;
    }

    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    pub fn timings(&self) -> &[Timing] {
        &self.timings
    }

    pub fn missed_polls(&self) -> u32 {
        self.missed_polls
    }

    /// Emit the request summary and drop the context
    pub fn finish(self) {
        debug!(
            request = self.id,
            tool = %self.tool,
            elapsed_ms = self.elapsed().as_millis() as u64,
            commands = self.commands().len(),
            missed_polls = self.missed_polls(),
            "request finished"
        );
        for record in self.commands() {
            debug!(
                request = self.id,
                at_ms = record.at.as_millis() as u64,
                command = %record.command,
                "command"
            );
        }
        for timing in self.timings() {
            debug!(
                request = self.id,
                label = timing.label,
                at_ms = timing.at.as_millis() as u64,
                "timing"
            );
        }
    }
}
