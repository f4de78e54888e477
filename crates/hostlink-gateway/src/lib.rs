//! HTTP and WebSocket command gateway for a single-threaded host.
//!
//! Network tasks parse command envelopes and queue them; the host drains the
//! queue from its own thread by calling [`Dispatcher::tick`], so handlers get
//! exclusive `&mut` access to host state. Results flow back to the waiting
//! request, and the host can push text to every WebSocket client through the
//! [`BroadcastRegistry`].

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod methods;
pub mod port;
pub mod queue;
pub mod registry;
pub mod request;
pub mod server;
pub mod state;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use dispatch::Dispatcher;
pub use error::GatewayError;
pub use events::{BroadcastRegistry, InboundMessage};
pub use methods::register_capabilities;
pub use registry::{CommandContext, CommandHandler, CommandRegistry};
pub use server::{ServerHandle, ServerStatus};
