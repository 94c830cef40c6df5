//! # planstream
//!
//! Job execution and live output streaming for infrastructure automation
//! commands. A job runs an external tool (plan/apply style) in its own
//! process group, its merged stdout/stderr is filtered, stored, and fanned
//! out to any number of WebSocket viewers: live while the job runs, from
//! the persisted transcript afterwards.
//!
//! ## Modules
//!
//! - `subprocess` - structured command assembly and the streaming process
//!   runner with cancellation escalation
//! - `registry` - non-blocking fan-out of output lines to viewer queues
//! - `store` - two-tier (volatile + durable) job transcript store
//! - `filter` - line-level output suppression
//! - `stream` - the single sequential consumer joining runner, store, and
//!   registry
//! - `engine` - pipeline assembly and job execution
//! - `gateway` - the WebSocket subscription gateway
//! - `config` - service configuration and backend selection

pub mod config;
pub mod engine;
pub mod filter;
pub mod gateway;
pub mod registry;
pub mod store;
pub mod stream;
pub mod subprocess;
