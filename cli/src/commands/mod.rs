//! Interactive console commands for stompwire.
//!
//! - [`parse`] - Line parsing into [`ConsoleCommand`]
//! - [`render`] - Text output for timeline entries and status
//!
//! # Usage
//!
//! ```ignore
//! use stompwire::commands;
//!
//! if let Some(command) = commands::parse("send /app/chat hello")? {
//!     // dispatch against the session manager
//! }
//! ```

pub mod parse;
pub mod render;

#[doc(inline)]
pub use parse::{parse, CommandError, ConsoleCommand, HELP};
