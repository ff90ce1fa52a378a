//! Engine bridge, client state, task history and the top-level driver.

pub mod bridge;
pub mod client;
mod error;
pub mod history;
pub mod runner;

pub use error::{Error, Result};
