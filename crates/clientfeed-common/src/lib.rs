//! Clientfeed Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the clientfeed workspace.
//!
//! # Example
//!
//! ```no_run
//! use clientfeed_common::logging::{init_logging, LogConfig};
//! use clientfeed_common::{FeedError, Result};
//!
//! fn start() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FeedError, Result};
