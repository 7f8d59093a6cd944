//! # Canvas Runtime Core
//!
//! Shared, I/O-free logic for Canvas Runtime: document models, the
//! line-level diff engine, and the per-document version history.
//!
//! This crate contains no tokio, Lua, network, or filesystem
//! dependencies. Everything here is deterministic and testable in
//! isolation.

pub mod diff;
pub mod history;
pub mod models;
