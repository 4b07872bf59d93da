//! # Squall
//!
//! A Kaiheila websocket gateway connection keeper.
//!
//! Squall owns the lifecycle of one logical gateway connection: it pulls a
//! gateway url from the discovery api, opens the websocket, performs the
//! hello handshake, keeps the link alive with ping/pong heartbeats, and
//! heals itself with exponential backoff when anything goes wrong,
//! resuming the old session where the gateway allows it.
//!
//! The decision-making lives in a pure state machine ([`fsm`]); all I/O is
//! carried out by an effect executor behind the [`ws::Source`] handle.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use squall::{ws::Source, Config};
//!
//! # async fn run() -> squall::Result<()> {
//! let (source, mut events) = Source::with_bot_token("token", true, Config::default())?;
//!
//! source.connect();
//!
//! while let Some(event) = events.next().await {
//!     println!("{}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod fsm;
pub mod ws;

mod config;
mod error;

pub use config::Config;
pub use error::{Error, Result};
