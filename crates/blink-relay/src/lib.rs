//! Relay engine for blinksocks-rs.
//!
//! Accepted client connections are paired with an upstream transport and
//! driven through a stage pipeline. In the client role the front-end speaks
//! SOCKS5, HTTP proxy or raw UDP and the upstream is a blinksocks server; in
//! the server role the pipeline decodes the tunnel and names the destination.

pub mod cli;
pub mod connection;
pub mod context;
pub mod error;
pub mod listener;
pub mod negotiator;
pub mod track;
pub mod transport;
pub mod util;

pub use connection::{Connection, ConnectionSummary, Phase};
pub use context::{NodeMode, RelayContext, UpstreamProfile, Upstreams};
pub use error::RelayError;
pub use listener::Listeners;
pub use negotiator::{Ack, ClientHandshakeNegotiator, Handshake, Protocol, Step};
pub use track::{TrackDirection, TrackLog, TrackSummary};
pub use transport::{Dialer, NetDialer, Transport, TransportRead, TransportWrite};
pub use util::ConnectionTracker;
pub use tokio_util::sync::CancellationToken;
