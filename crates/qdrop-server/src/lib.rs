//! qdrop-server: Session coordination server for qdrop file sharing.
//!
//! Provides:
//! - Session registry keyed by share code
//! - Join/leave role policy
//! - Signaling and chunked-transfer relay
//! - File registration and retrieval
//! - TTL and empty-session expiry scheduling

pub mod cli;
pub mod connection;
pub mod files;
pub mod listener;
pub mod registry;
pub mod roles;
pub mod scheduler;
pub mod session;
pub mod signaling;
pub mod storage;

pub use cli::Cli;
pub use connection::{ConnectionActor, ServerContext};
pub use registry::SessionRegistry;
pub use roles::RoleManager;
pub use scheduler::{SchedulerConfig, SchedulerHandle};
pub use session::Session;
pub use storage::{MemoryStorage, Storage};
