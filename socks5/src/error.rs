use thiserror::Error;

use crate::proto::reply_message;

#[derive(Error, Debug)]
pub enum Error {
    /// The proxy answered the greeting with "no acceptable methods".
    #[error("socks5: proxy rejected all offered auth methods")]
    AuthRejected,

    #[error("socks5: proxy selected unoffered method {0:#04x}")]
    UnexpectedMethod(u8),

    /// Non-success REP field of a CONNECT/UDP ASSOCIATE reply.
    #[error("socks5: request failed with code {0:#04x} ({msg})", msg = reply_message(.0))]
    ConnectFailed(u8),

    #[error("socks5: {0}")]
    Protocol(String),

    #[error("socks5: domain name of {0} bytes is too long")]
    DomainTooLong(usize),

    /// The session's proxy connection was already handed to another request.
    #[error("socks5: session is in use")]
    SessionBusy,

    #[error("socks5: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
