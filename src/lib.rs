//! UART bridge protocol: framing, packet codec, reliable request/response
//! session, and RPC dispatch shared between the client and proxy binaries.

pub mod client;
pub mod config;
pub mod crc;
pub mod error;
pub mod framer;
pub mod packet;
pub mod proxy;
pub mod value;
