//! Orchestrator daemon assembly: plugin wiring and the HTTP surface.

pub mod composition;
pub mod http;

pub use composition::{build_registry, builtin_modules, App};
pub use http::{router, serve, HttpState};
