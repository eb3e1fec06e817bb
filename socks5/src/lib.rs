//! SOCKS5 client (RFC 1928): CONNECT and UDP ASSOCIATE without authentication.

mod client;
mod error;
mod proto;
mod udp;

pub use client::{connect, udp_associate, Session};
pub use error::{Error, Result};
pub use proto::{reply_message, Address};
pub use udp::{decode_datagram, encode_datagram, UdpSocket};
