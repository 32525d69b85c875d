//! Kameo-based gateway session engine: frame reassembly, heartbeats, dispatch and
//! reconnect over a websocket transport.

pub mod client;
pub mod codec;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod testing;
pub mod tls;
pub mod transport;
pub mod ws;

pub use client::GatewayClient;
pub use config::{GatewayConfig, GatewayIntents, MIN_BUFFER_SIZE};
pub use core::{ConnectionState, GatewayError, GatewayResult, SessionSnapshot};
pub use dispatch::{DispatchMode, EventReceiver, GatewayEvent, GatewayEventHandler};
