//! # pop_http_rs
//!
//! Impersonate a networked LIFX-protocol smart light over UDP so a
//! Logitech Pop wall switch (which only knows how to control such
//! lights) can trigger arbitrary HTTP webhooks instead.
//!
//! The Pop bridge reports one button press as a retransmitted burst of
//! `LightSetPower`/`LightSetColor` datagram pairs, possibly from several
//! bridges at once. This crate answers the protocol well enough to stay
//! paired, collapses each burst into exactly one logical action, and
//! routes that action to the configured HTTP targets.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pop_http_rs::{Config, Server};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml".as_ref())?;
//!     let mut server = Server::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! datagram → [`decode`] → (protocol reply) + [`Tracker::handle`] →
//! [`TriggerEvent`] → [`Router::resolve`] → [`DispatchRecord`]s →
//! HTTP calls.
//!
//! The whole pipeline runs on one task; a datagram is fully handled
//! before the next is read, so no state needs locking.

mod config;
mod dispatch;
mod errors;
mod protocol;
mod router;
mod server;
mod tracker;

// Re-export public API
pub use config::{CidrFilter, Config};
pub use dispatch::Dispatcher;
pub use errors::Error;
pub use protocol::{
    BROADCAST_SITE, BROADCAST_TARGET, Decoded, HEADER_LEN, Header, LABEL_LEN, Message, POWER_OFF,
    POWER_ON, Packet, Session, codes, decode,
};
pub use router::{
    DispatchRecord, EndpointOverlay, HttpMethod, Router, SwitchFilter, TargetSpec, Template,
};
pub use server::Server;
pub use tracker::{Clock, SwitchState, SystemClock, Tracker, TriggerEvent};
