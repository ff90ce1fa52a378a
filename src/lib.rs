//! Omni stream - headless agent runner for the Omni ecosystem.
//!
//! Runs an agent engine without a UI and reports its progress as text, a
//! single JSON result, or a stream of NDJSON events. In stream mode a
//! controller can drive the agent through NDJSON commands on stdin.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   commands   ┌─────────────┐   requests   ┌─────────────┐
//! │ controller  │ ───────────▶ │   stream    │ ───────────▶ │ engine host │
//! │  (stdin)    │ ◀─────────── │  (emitter)  │ ◀─────────── │  (bridge)   │
//! └─────────────┘    events    └─────────────┘   messages   └─────────────┘
//! ```

pub mod build_info;
pub mod cli;
pub mod config;
pub mod core;
pub mod stream;

pub use config::Config;
pub use stream::{JsonEventEmitter, OutputFormat, OutputSink, StdinSession, StreamEvent};
