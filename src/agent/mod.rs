//! Agent execution protocol client.
//!
//! One external worker process is spawned per execution. Communication is
//! newline-delimited JSON-RPC over the process's standard streams:
//! handshake (`initialize`), session creation (`session/new`), one prompt
//! turn (`session/prompt`), then a stream of `session/update` notifications
//! until a terminal frame or timeout.

mod client;
mod executor;
mod protocol;

pub use client::{AgentClientConfig, AgentConnection, ExecutionResult, TurnState};
pub use executor::{render_prompt, AgentExecutor};
pub use protocol::{
    IncomingMessage, MessageChunk, RpcErrorObject, SessionNotification, SessionUpdate,
};
