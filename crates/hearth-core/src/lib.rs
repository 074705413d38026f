//! Hearth Core
//!
//! Runtime backbone shared by the server and CLI:
//! - `instance`: registry of path-keyed workspace instances
//! - `process`: background shell tasks with non-blocking output polling
//! - `mcp`: tool-provider lifecycle (stdio, HTTP, SSE)
//! - `hooks`: user-configured commands at lifecycle checkpoints
//! - `agent`: prompt queue and tool execution around an external turn runner

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod instance;
pub mod lsp;
pub mod mcp;
pub mod paths;
pub mod permission;
pub mod process;
pub mod proto;
pub mod session;
pub mod shell;
pub mod sse;
pub mod tools;

pub use error::{HearthError, Result};
