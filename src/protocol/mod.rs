//! Realtime protocol client
//!
//! JSON text frames over a websocket. Outbound payloads are base64 inside a
//! `{type, data}` envelope; inbound messages are decoded into
//! [`ServerEvent`]s delivered in arrival order.

mod client;
mod messages;

pub use client::{ConnectionState, OutboundSender, ProtocolClient, ServerEvent};
pub use messages::{ClientMessage, Role, ServerMessage, decode_payload};
