use serde::{Deserialize, Serialize};

use super::markers::{self, MarkerKind};

/// Status of the Gemini session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent is actively processing (spinning, thinking)
    Busy,
    /// Agent is idle, waiting at prompt
    Idle,
    /// Agent is blocked on a permission prompt
    WaitingForInput,
    /// Agent encountered an error
    Error,
    /// Status cannot be determined
    #[default]
    Unknown,
}

/// Engine for inferring agent status from pane content
pub struct StateInferenceEngine;

impl StateInferenceEngine {
    /// Analyze pane content and determine agent status
    pub fn analyze(content: &str) -> AgentStatus {
        let recent = markers::live_tail(content);

        // Priority order: WaitingForInput > Busy > Error > Idle > Unknown
        if markers::any_line(MarkerKind::PermissionPrompt, recent.iter().copied()) {
            return AgentStatus::WaitingForInput;
        }

        if recent.iter().any(|line| markers::is_live_status(line)) {
            return AgentStatus::Busy;
        }

        if markers::any_line(MarkerKind::Error, recent.iter().copied()) {
            return AgentStatus::Error;
        }

        if markers::any_line(MarkerKind::PromptToken, recent.iter().copied()) {
            return AgentStatus::Idle;
        }

        AgentStatus::Unknown
    }
}
