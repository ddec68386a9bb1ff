//! Remote-console (RCON) client.
//!
//! A synchronous client for the length-prefixed binary console protocol:
//! password authentication, single-packet command execution and a
//! best-effort parser for the free-text `list` output.
//!
//! # Wire format
//!
//! See [`wire`] module for the packet layout.

pub mod client;
pub mod error;
pub mod player_list;
pub mod wire;

pub use client::{RconClient, RconConfig};
pub use error::RconError;
pub use player_list::parse_list_response;
