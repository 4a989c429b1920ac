//! Tool dispatch: maps MCP tool calls onto the configured transport.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, TransportKind};
use crate::context::RequestContext;
use crate::error::{BridgeError, BridgeResult};
use crate::mcp::tools::{self, ToolResult};
use crate::mcp::ToolHandler;
use crate::oneshot::{OneShotOutput, OneShotTransport};
use crate::references::expand_file_references;
use crate::tmux::{CompletionStatus, PermissionPolicy, SessionTransport};

/// Words that suggest Gemini will go to the web and need the longer budget
const SEARCH_KEYWORDS: &[&str] = &[
    "search", "latest", "news", "current", "today", "look up", "lookup", "web", "internet",
    "online",
];

const NO_RESPONSE: &str = "No response captured from Gemini.";

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    message: String,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    permission: Option<PermissionPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusArgs {
    #[serde(default)]
    tail_lines: Option<usize>,
    #[serde(default)]
    full_transcript: bool,
}

/// Status reported when no persistent session exists
#[derive(Debug, Serialize)]
struct OneShotStatus {
    transport: &'static str,
    binary: String,
    working_directory: String,
    messages_sent: u32,
}

pub enum Transport {
    Session(SessionTransport),
    OneShot(OneShotTransport),
}

/// The tool handler behind the MCP server
pub struct GeminiBridge {
    transport: Transport,
    workdir: PathBuf,
    default_budget: Duration,
    search_budget: Duration,
    default_permission: PermissionPolicy,
    binary: String,
    one_shot_messages: u32,
}

impl GeminiBridge {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = match config.transport {
            TransportKind::Session => Transport::Session(SessionTransport::new(
                config.session_name.clone(),
                config.gemini_bin.clone(),
                config.gemini_args.clone(),
            )),
            TransportKind::OneShot => Transport::OneShot(OneShotTransport::new(
                config.gemini_bin.clone(),
                config.gemini_args.clone(),
                config.idle_window(),
            )),
        };
        Ok(Self {
            transport,
            workdir: config.resolve_workdir()?,
            default_budget: config.default_budget(),
            search_budget: config.search_budget(),
            default_permission: config.permission,
            binary: config.gemini_bin.clone(),
            one_shot_messages: 0,
        })
    }

    /// Kill a session left over from a previous run before serving
    pub async fn startup_cleanup(&mut self) {
        if let Transport::Session(session) = &mut self.transport {
            match session.cleanup_stale().await {
                Ok(true) => info!(session = session.name(), "Removed stale session"),
                Ok(false) => {}
                Err(e) => warn!("Startup cleanup failed: {:#}", e),
            }
        }
    }

    /// Budget for a message: explicit, else search or default by keyword
    pub fn time_budget(&self, message: &str, explicit_secs: Option<u64>) -> Duration {
        match explicit_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ if is_search_intent(message) => self.search_budget,
            _ => self.default_budget,
        }
    }

    async fn send_message(
        &mut self,
        args: SendMessageArgs,
        ctx: &mut RequestContext,
    ) -> BridgeResult<String> {
        let workdir = args.working_directory.unwrap_or_else(|| self.workdir.clone());
        if !workdir.is_dir() {
            return Err(BridgeError::WorkingDirectory { path: workdir });
        }

        let message = expand_file_references(&args.message, &workdir);
        let budget = self.time_budget(&message, args.timeout_seconds);
        let policy = args.permission.unwrap_or(self.default_permission);
        info!(
            request = ctx.id(),
            budget_secs = budget.as_secs(),
            chars = message.chars().count(),
            "Sending message to Gemini"
        );

        match &mut self.transport {
            Transport::Session(session) => {
                let exchange = session.send(&message, &workdir, budget, policy, ctx).await?;
                let timed_out = exchange.outcome.status == CompletionStatus::TimedOut;
                info!(
                    request = ctx.id(),
                    status = ?exchange.outcome.status,
                    elapsed_ms = exchange.outcome.elapsed.as_millis() as u64,
                    prompts = exchange.outcome.prompts_answered,
                    "Reply received"
                );
                Ok(label_reply(&exchange.reply, timed_out, exchange.outcome.reply_seen, budget))
            }
            Transport::OneShot(one_shot) => {
                let output = one_shot.run(&message, &workdir, budget, ctx).await?;
                self.one_shot_messages += 1;
                Ok(label_one_shot(output, budget))
            }
        }
    }

    async fn status(&mut self, args: StatusArgs, ctx: &mut RequestContext) -> ToolResult {
        match &mut self.transport {
            Transport::Session(session) => {
                let status = session.status(args.tail_lines, args.full_transcript, ctx).await;
                ToolResult::json_pretty(&status)
            }
            Transport::OneShot(_) => ToolResult::json_pretty(&OneShotStatus {
                transport: "one-shot",
                binary: self.binary.clone(),
                working_directory: self.workdir.display().to_string(),
                messages_sent: self.one_shot_messages,
            }),
        }
    }

    async fn clear(&mut self, ctx: &mut RequestContext) -> BridgeResult<String> {
        match &mut self.transport {
            Transport::Session(session) => {
                let report = session.clear(ctx).await?;
                if !report.alive {
                    return Ok("No Gemini session is running; nothing to clear.".to_string());
                }
                Ok(format!(
                    "Conversation cleared. Messages before: {}, after: {}.",
                    report.messages_before, report.messages_after
                ))
            }
            Transport::OneShot(_) => {
                Ok("One-shot transport keeps no conversation; nothing to clear.".to_string())
            }
        }
    }

    async fn close(&mut self, ctx: &mut RequestContext) -> BridgeResult<String> {
        match &mut self.transport {
            Transport::Session(session) => {
                let name = session.name().to_string();
                if session.close(ctx).await? {
                    Ok(format!("Session '{}' closed.", name))
                } else {
                    Ok(format!("Session '{}' was not running.", name))
                }
            }
            Transport::OneShot(_) => {
                Ok("One-shot transport keeps no session; nothing to close.".to_string())
            }
        }
    }
}

#[async_trait]
impl ToolHandler for GeminiBridge {
    async fn call(&mut self, name: &str, arguments: Value) -> ToolResult {
        let mut ctx = RequestContext::new(name);

        let result = match name {
            tools::SEND_MESSAGE => match parse_args::<SendMessageArgs>(arguments) {
                Ok(args) if args.message.trim().is_empty() => {
                    ToolResult::error("'message' must not be empty")
                }
                Ok(args) => into_tool_result(self.send_message(args, &mut ctx).await),
                Err(result) => result,
            },
            tools::GET_STATUS => match parse_args::<StatusArgs>(arguments) {
                Ok(args) => self.status(args, &mut ctx).await,
                Err(result) => result,
            },
            tools::CLEAR_CONVERSATION => into_tool_result(self.clear(&mut ctx).await),
            tools::CLOSE_SESSION => into_tool_result(self.close(&mut ctx).await),
            other => ToolResult::error(format!("Unknown tool: {}", other)),
        };

        ctx.finish();
        result
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolResult> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolResult::error(format!("Invalid arguments: {}", e)))
}

fn into_tool_result(result: BridgeResult<String>) -> ToolResult {
    match result {
        Ok(text) => ToolResult::text(text),
        Err(e) => {
            warn!("Tool call failed: {}", e);
            ToolResult::error(e.to_string())
        }
    }
}

/// Whether a message reads like a request to search the web
pub fn is_search_intent(message: &str) -> bool {
    let lower = message.to_lowercase();
    SEARCH_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn label_reply(reply: &str, timed_out: bool, reply_seen: bool, budget: Duration) -> String {
    match (timed_out, reply.is_empty()) {
        (false, false) => reply.to_string(),
        (false, true) => NO_RESPONSE.to_string(),
        (true, true) if !reply_seen => format!(
            "[Timed out after {}s before Gemini started replying] {}",
            budget.as_secs(),
            NO_RESPONSE
        ),
        (true, true) => format!("[Timed out after {}s] {}", budget.as_secs(), NO_RESPONSE),
        (true, false) => format!(
            "[Timed out after {}s; partial response]\n{}",
            budget.as_secs(),
            reply
        ),
    }
}

fn label_one_shot(output: OneShotOutput, budget: Duration) -> String {
    let mut body = output.stdout;
    if body.is_empty() && !output.stderr.is_empty() {
        body = output.stderr;
    }

    let prefix = if output.timed_out {
        Some(format!("[Timed out after {}s", budget.as_secs()))
    } else if output.idle_killed {
        Some("[Gemini produced no output for too long and was stopped".to_string())
    } else {
        None
    };

    match (prefix, body.is_empty()) {
        (None, false) => body,
        (None, true) => NO_RESPONSE.to_string(),
        (Some(prefix), true) => format!("{}] {}", prefix, NO_RESPONSE),
        (Some(prefix), false) => format!("{}; partial response]\n{}", prefix, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    fn one_shot_bridge(program: &str, args: &[&str], workdir: &Path) -> GeminiBridge {
        let mut argv = vec![
            "gemini-bridge".to_string(),
            "--transport".to_string(),
            "one-shot".to_string(),
            "--gemini-bin".to_string(),
            program.to_string(),
            "--workdir".to_string(),
            workdir.display().to_string(),
            "--idle-timeout".to_string(),
            "5".to_string(),
        ];
        for arg in args {
            argv.push("--gemini-arg".to_string());
            argv.push(arg.to_string());
        }
        let config = Config::try_parse_from(argv).unwrap();
        GeminiBridge::from_config(&config).unwrap()
    }

    #[test]
    fn test_search_intent() {
        assert!(is_search_intent("Search for the latest tokio release"));
        assert!(is_search_intent("what's in the NEWS today"));
        assert!(!is_search_intent("explain this borrow checker error"));
    }

    #[test]
    fn test_time_budget_selection() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = one_shot_bridge("cat", &[], dir.path());
        assert_eq!(bridge.time_budget("explain traits", None), Duration::from_secs(90));
        assert_eq!(bridge.time_budget("search the web for X", None), Duration::from_secs(180));
        assert_eq!(bridge.time_budget("search the web for X", Some(7)), Duration::from_secs(7));
        assert_eq!(bridge.time_budget("explain traits", Some(0)), Duration::from_secs(90));
    }

    #[test]
    fn test_label_reply() {
        let budget = Duration::from_secs(30);
        assert_eq!(label_reply("✦ hi", false, true, budget), "✦ hi");
        assert_eq!(label_reply("", false, true, budget), NO_RESPONSE);
        assert!(label_reply("", true, false, budget).contains("before Gemini started replying"));
        assert!(label_reply("✦ par", true, true, budget).starts_with("[Timed out after 30s; partial response]\n"));
    }

    #[test]
    fn test_label_one_shot() {
        let budget = Duration::from_secs(30);
        let output = OneShotOutput {
            stdout: String::new(),
            idle_killed: true,
            ..Default::default()
        };
        assert_eq!(
            label_one_shot(output, budget),
            format!("[Gemini produced no output for too long and was stopped] {}", NO_RESPONSE)
        );

        let output = OneShotOutput {
            stdout: String::new(),
            stderr: "API key not valid".to_string(),
            exit_code: Some(1),
            ..Default::default()
        };
        assert_eq!(label_one_shot(output, budget), "API key not valid");
    }

    #[tokio::test]
    async fn test_send_message_expands_references_through_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let abs = dir.path().join("package.json").canonicalize().unwrap();

        let mut bridge = one_shot_bridge("cat", &[], dir.path());
        let result = bridge
            .call(tools::SEND_MESSAGE, serde_json::json!({ "message": "@package.json explain" }))
            .await;
        assert!(!result.is_error());
        assert_eq!(result.text_content(), format!("@{} explain", abs.display()));
    }

    #[tokio::test]
    async fn test_send_message_rejects_bad_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = one_shot_bridge("cat", &[], dir.path());

        let result = bridge.call(tools::SEND_MESSAGE, serde_json::json!({})).await;
        assert!(result.is_error());
        assert!(result.text_content().starts_with("Invalid arguments"));

        let result = bridge
            .call(tools::SEND_MESSAGE, serde_json::json!({ "message": "   " }))
            .await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_missing_working_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = one_shot_bridge("cat", &[], dir.path());
        let result = bridge
            .call(
                tools::SEND_MESSAGE,
                serde_json::json!({ "message": "hi", "working_directory": "/definitely/not/here" }),
            )
            .await;
        assert!(result.is_error());
        assert!(result.text_content().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_failures_do_not_poison_next_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = one_shot_bridge("no-such-gemini-binary-xyz", &[], dir.path());
        let result = bridge
            .call(tools::SEND_MESSAGE, serde_json::json!({ "message": "hi" }))
            .await;
        assert!(result.is_error());
        assert!(result.text_content().contains("not found on PATH"));

        let result = bridge.call(tools::GET_STATUS, Value::Null).await;
        assert!(!result.is_error());
        assert!(result.text_content().contains("one-shot"));
    }

    #[tokio::test]
    async fn test_one_shot_clear_and_close_are_no_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = one_shot_bridge("cat", &[], dir.path());
        let clear = bridge.call(tools::CLEAR_CONVERSATION, serde_json::json!({})).await;
        assert!(clear.text_content().contains("nothing to clear"));
        let close = bridge.call(tools::CLOSE_SESSION, serde_json::json!({})).await;
        assert!(close.text_content().contains("nothing to close"));
    }

    #[tokio::test]
    async fn test_one_shot_status_counts_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = one_shot_bridge("cat", &[], dir.path());
        bridge
            .call(tools::SEND_MESSAGE, serde_json::json!({ "message": "one" }))
            .await;
        let status = bridge.call(tools::GET_STATUS, serde_json::json!({})).await;
        let value: Value = serde_json::from_str(&status.text_content()).unwrap();
        assert_eq!(value["messages_sent"], 1);
        assert_eq!(value["transport"], "one-shot");
    }
}
