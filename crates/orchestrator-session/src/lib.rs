//! Session Manager: the single writer of a session's existence.
//!
//! Spawning wires tracker, workspace, agent and runtime together and hands
//! the new record to the lifecycle manager. Termination cancels whatever the
//! lifecycle manager is doing for the session, tears resources down, and
//! archives the record.

mod manager;
mod spawn;

pub use manager::SessionManager;
pub use spawn::SpawnOptions;
