//! Distributed mode implementation
//!
//! A controller runs the barrier scheduler locally and hands jobs that name
//! an agent to a [`RemoteJobProxy`]. Each proxy opens one connection to an
//! [`AgentService`], which runs the job on its own host and streams stats
//! back.
//!
//! # Modules
//!
//! - `protocol`: Message definitions and framing
//! - `agent`: Agent service, one job per connection
//! - `remote_job`: Controller-side proxy implementing the job lifecycle

pub mod agent;
pub mod protocol;
pub mod remote_job;

// Re-export key types
pub use agent::AgentService;
pub use protocol::{JobParams, Message, OpCode, Response, Status, DEFAULT_AGENT_PORT, PROTOCOL_VERSION};
pub use remote_job::RemoteJobProxy;
