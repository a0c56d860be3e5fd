//! MQTT 3.1.1 client runtime core: session state machine, ack table,
//! subscription table and packet dispatcher, built on the `mqtt-packet`
//! codec and `mqtt-core` wire vocabulary.
//!
//! The crate owns one background worker thread per [`Client`] once
//! [`Client::connect`] succeeds; any number of producer threads may call the
//! public API concurrently (§5 of the design notes this crate implements).

mod ack;
mod client;
mod config;
mod dispatch;
mod error;
mod framing;
mod platform;
mod session;
mod subscription;
mod topic;
mod transport;

pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder, Will, ACK_MAX};
pub use error::{Error, Result};
pub use platform::{random_client_id, Countdown};
pub use session::SessionState;
pub use subscription::{Delivery, Handler, Subscription};
pub use topic::{equals, matches, validate_filter};
pub use transport::{TcpTransport, Transport};

pub use mqtt_core::QoS;
