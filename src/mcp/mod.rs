//! MCP (Model Context Protocol) surface: JSON-RPC types, tool catalog and
//! the stdio server loop.

pub mod protocol;
pub mod server;
pub mod tools;

pub use server::{McpServer, ToolHandler};
