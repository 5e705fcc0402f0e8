//! Server-side core of a KNXnet/IP gateway: the per-connection
//! data-endpoint protocol engine together with the KNX IP Secure session
//! layer that wraps it.
//!
//! Everything else a real gateway needs (the UDP/TCP socket loops, the
//! control-endpoint discovery/connect/disconnect service, the KNX subnet
//! driver, the configuration loader, and logging setup) lives outside
//! this crate. See [`callbacks`] and [`config`] for the narrow interfaces
//! this crate needs from those collaborators.

pub mod address;
pub mod callbacks;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod loop_adapter;
pub mod session;

pub use address::IndividualAddress;
pub use callbacks::{BusFrameSink, CloseReason, ControlEndpointCallbacks, OutboundDatagramSink, SubnetStatus};
pub use channel::handler::{DataEndpointHandler, SendMode};
pub use channel::{Channel, ChannelRole, ConnectionState};
pub use config::{GatewayConfig, UserCredential};
pub use error::{ChannelError, FrameError, SessionError};
pub use loop_adapter::{ChannelRegistry, LoopError, ServiceLoopAdapter};
pub use session::{AcceptOutcome, ConnectionKind, SecureSessionStore, Session};
