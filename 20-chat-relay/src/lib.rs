//! Chat relay over TCP.
//!
//! Clients log in with a display name and everything they send is fanned out
//! to every other logged-in client. Frames are newline-delimited JSON; see
//! [`message`] for their shape.
//!
//! - [`codec`] frames JSON values on a byte stream for `tokio_util`.
//! - [`registry`] owns the name → session map behind a single lock.
//! - [`protocol`] is the login/logout state machine applied to each frame.
//! - [`dispatcher`] writes broadcast frames to every other session.
//! - [`connection`] runs the per-connection read loop and owns its outbox.
//! - [`server`] accepts connections and drains them on shutdown.
//! - [`client`] dials a relay and provides a line-oriented front-end.
//! - [`cli`] and [`config`] describe how the binary is configured.
//!
//! Unit tests live next to each module; `tests/` drives a real listener and
//! the compiled binary.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::dial;
pub use server::serve;
