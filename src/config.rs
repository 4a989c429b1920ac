use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::tmux::PermissionPolicy;

/// How messages reach the Gemini CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Interactive Gemini inside a tmux session
    Session,
    /// A fresh Gemini process per message, fed through stdin
    OneShot,
}

/// MCP server exposing the Gemini CLI as tools
#[derive(Debug, Clone, Parser)]
#[command(name = "gemini-bridge", version, about)]
pub struct Config {
    /// Transport used to talk to Gemini
    #[arg(long, value_enum, env = "GEMINI_BRIDGE_TRANSPORT", default_value = "session")]
    pub transport: TransportKind,

    /// Gemini CLI binary, resolved through PATH
    #[arg(long, env = "GEMINI_BRIDGE_BIN", default_value = "gemini")]
    pub gemini_bin: String,

    /// Extra argument passed to the Gemini CLI (repeatable)
    #[arg(long = "gemini-arg", allow_hyphen_values = true)]
    pub gemini_args: Vec<String>,

    /// Directory Gemini runs in and file references resolve against
    #[arg(long, env = "GEMINI_BRIDGE_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// tmux session name used by the session transport
    #[arg(long, env = "GEMINI_BRIDGE_SESSION", default_value = "gemini_bridge")]
    pub session_name: String,

    /// Reply budget in seconds for ordinary messages
    #[arg(long, env = "GEMINI_BRIDGE_TIMEOUT", default_value_t = 90)]
    pub default_timeout: u64,

    /// Reply budget in seconds for messages that look like web searches
    #[arg(long, env = "GEMINI_BRIDGE_SEARCH_TIMEOUT", default_value_t = 180)]
    pub search_timeout: u64,

    /// One-shot transport: seconds without output before Gemini is killed
    #[arg(long, env = "GEMINI_BRIDGE_IDLE_TIMEOUT", default_value_t = 60)]
    pub idle_timeout: u64,

    /// Default answer to Gemini permission prompts
    #[arg(long, value_enum, env = "GEMINI_BRIDGE_PERMISSION", default_value = "once")]
    pub permission: PermissionPolicy,

    /// Leave an existing tmux session alone at startup
    #[arg(long)]
    pub skip_cleanup: bool,
}

impl Config {
    /// Configured working directory, or the process's current one
    pub fn resolve_workdir(&self) -> Result<PathBuf> {
        match &self.workdir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Failed to read current directory"),
        }
    }

    pub fn default_budget(&self) -> Duration {
        Duration::from_secs(self.default_timeout)
    }

    pub fn search_budget(&self) -> Duration {
        Duration::from_secs(self.search_timeout)
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}
