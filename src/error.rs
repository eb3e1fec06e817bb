use std::io;

use thiserror::Error;

use crate::dialer::Network;

#[derive(Error, Debug)]
pub enum Error {
    /// The dialer cannot serve this network kind.
    #[error("network {0} is not supported here")]
    NetworkUnsupported(Network),

    #[error(transparent)]
    Proxy(#[from] socks5::Error),

    #[error("dial {addr}: {source}")]
    Dial { addr: String, source: io::Error },

    #[error("resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("Err when reading: {0}")]
    Read(io::Error),

    #[error("Err when writing: {0}")]
    Write(io::Error),

    #[error("Err when reading input: {0}")]
    Input(io::Error),

    #[error("Err when writing output: {0}")]
    Output(io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
