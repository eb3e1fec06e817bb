pub mod codec;
pub mod config;
pub mod dialer;
pub mod error;
pub mod relay;

pub use config::Config;
pub use dialer::{Dialer, DirectDialer, Network, PacketEndpoint, Socks5Dialer};
pub use error::{Error, Result};
pub use relay::RelayEngine;
