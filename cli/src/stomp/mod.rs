//! STOMP over WebSocket.
//!
//! - [`frame`] - STOMP 1.2 frame codec
//! - [`client`] - [`StompTransport`], the [`crate::transport::Transport`]
//!   implementation used by the console

pub mod client;
pub mod frame;

pub use client::StompTransport;
pub use frame::{Command, Decoded, StompFrame};
