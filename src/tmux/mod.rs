mod client;
mod detector;
mod extractor;
mod heuristics;
pub mod markers;
mod permission;
mod session;

pub use client::TmuxClient;
pub use detector::CompletionStatus;
pub use permission::PermissionPolicy;
pub use session::SessionTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

/// Represents a tmux session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmuxSession {
    /// Session ID (e.g., "$0")
    pub id: String,
    /// Session name
    pub name: String,
    /// Unix timestamp when session was created
    pub created_at: u64,
    /// Number of attached clients
    pub attached_clients: usize,
}

impl TmuxSession {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            created_at: 0,
            attached_clients: 0,
        }
    }
}

/// The pane the polling loop reads from and types into
#[async_trait]
pub trait Pane: Send {
    /// Capture the full pane text, scrollback included
    async fn capture(&mut self, ctx: &mut RequestContext) -> anyhow::Result<String>;

    /// Send a single named key ("Enter", "Down", "Escape")
    async fn send_key(&mut self, key: &str, ctx: &mut RequestContext) -> anyhow::Result<()>;
}
