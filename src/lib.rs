//! # Canvas Runtime
//!
//! The non-visual runtime behind a multi-language document canvas.
//!
//! A document (code, markup, query text) is presented by a chat or agent
//! layer, recorded as a new version, and mounted as a session. Plugins
//! decide what the canvas offers for the document's language:
//! capabilities contribute tabs and toolbar actions, connectors execute
//! the content against a sandbox, an interpreter, or a remote service.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Presentation │──▶│ VersionStore │──▶│ RenderOrchestr.  │
//! │ title/lang/  │   │ dedup + turn │   │ mount / tabs /   │
//! │ content      │   │ ordinals     │   │ insert / unmount │
//! └──────────────┘   └──────────────┘   └───────┬──────────┘
//!                                               │
//!                  ┌────────────────────────────┼──────────────┐
//!                  ▼                            ▼              ▼
//!          ┌──────────────┐           ┌──────────────┐  ┌────────────┐
//!          │ Capabilities │           │  Dispatcher  │  │ DiffEngine │
//!          │ tab/toolbar  │           │  Connectors  │  │ (changes)  │
//!          └──────────────┘           └──────────────┘  └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! canvas diff old.py new.py              # line diff with stats
//! canvas run script.lua                  # run through the Lua sandbox
//! canvas run query.sql --connection prod # delegated execution
//! canvas connectors                      # connector health
//! canvas capabilities --language python  # active capabilities
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`traits`] | Capability and connector contracts, registries |
//! | [`capabilities`] | Built-in editor, changes, and run capabilities |
//! | [`session`] | Session state, live content, connection selections |
//! | [`dispatch`] | Execution dispatch and result normalization |
//! | [`connector_sandbox`] | Isolated Lua sandbox |
//! | [`connector_interpreter`] | External interpreter process |
//! | [`connector_remote`] | Delegated HTTP execution |
//! | [`animation`] | Live insertion state machine |
//! | [`orchestrator`] | Mount lifecycle and tab state machine |
//! | [`commands`] | CLI command implementations |
//!
//! Pure models, the diff engine, and the version store live in the
//! `canvas_runtime_core` crate.

pub mod animation;
pub mod capabilities;
pub mod commands;
pub mod config;
pub mod connector_interpreter;
pub mod connector_remote;
pub mod connector_sandbox;
pub mod dispatch;
pub mod error;
mod lua_runtime;
pub mod orchestrator;
pub mod session;
pub mod traits;
