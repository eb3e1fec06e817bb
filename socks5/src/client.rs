use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, ToSocketAddrs};

use crate::error::{Error, Result};
use crate::proto::*;
use crate::udp::UdpSocket;

/// Opens a fresh proxy connection and tunnels a TCP stream to `destination`.
pub async fn connect<A: ToSocketAddrs>(proxy: A, destination: &Address) -> Result<TcpStream> {
    Session::open(proxy).await?.connect(destination).await
}

/// Opens a fresh proxy connection and associates `socket` with its UDP relay.
pub async fn udp_associate<A: ToSocketAddrs>(
    proxy: A,
    socket: tokio::net::UdpSocket,
) -> Result<UdpSocket> {
    Session::open(proxy).await?.udp_associate(socket).await
}

/// One TCP connection to a SOCKS5 proxy, good for a single request.
///
/// The request that claims the connection runs greeting, method selection,
/// the command and its reply in order. Any other request made on the same
/// session, whether concurrent or after the first, fails with
/// [`Error::SessionBusy`] and leaves the connection untouched.
pub struct Session {
    stream: Mutex<Option<TcpStream>>,
}

impl Session {
    pub async fn open<A: ToSocketAddrs>(proxy: A) -> Result<Self> {
        let stream = TcpStream::connect(proxy).await?;
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }

    /// CONNECT: on success the proxy connection is the tunnelled stream.
    pub async fn connect(&self, destination: &Address) -> Result<TcpStream> {
        let mut stream = self.claim()?;
        select_method(&mut stream).await?;
        let bind = request(&mut stream, CMD_CONNECT, destination).await?;
        debug!("socks5: connected to {} via {}", destination, bind);
        Ok(stream)
    }

    /// UDP ASSOCIATE: `socket` is wrapped so every datagram goes through the
    /// relay the proxy hands back. The proxy connection stays open inside the
    /// returned socket for as long as the association is needed.
    pub async fn udp_associate(&self, socket: tokio::net::UdpSocket) -> Result<UdpSocket> {
        let mut stream = self.claim()?;
        select_method(&mut stream).await?;

        let local_addr = socket.local_addr()?;
        let bind = request(&mut stream, CMD_UDP_ASSOCIATE, &Address::Ip(local_addr)).await?;
        let relay = relay_addr(&stream, bind).await?;
        debug!("socks5: udp relay at {}", relay);

        Ok(UdpSocket::new(socket, relay, stream))
    }

    fn claim(&self) -> Result<TcpStream> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::SessionBusy)
    }
}

async fn select_method(stream: &mut TcpStream) -> Result<()> {
    let request = [VER, 1, NO_AUTH];
    stream.write_all(&request).await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;

    if response[0] != VER {
        let error = format!("unexpected version {} in method reply", response[0]);
        return Err(Error::Protocol(error));
    }

    match response[1] {
        NO_AUTH => Ok(()),
        NO_ACCEPTABLE_METHODS => Err(Error::AuthRejected),
        m => Err(Error::UnexpectedMethod(m)),
    }
}

/// Sends `cmd` for `address` and returns BND.ADDR from a successful reply.
async fn request(stream: &mut TcpStream, cmd: u8, address: &Address) -> Result<Address> {
    let mut request = Vec::with_capacity(3 + MAX_ADDR_LEN);
    request.extend_from_slice(&[VER, cmd, 0]);
    address.write_to(&mut request)?;
    stream.write_all(&request).await?;

    let mut response = [0u8; 3];
    stream.read_exact(&mut response).await?;

    if response[0] != VER {
        let error = format!("unexpected version {} in reply", response[0]);
        return Err(Error::Protocol(error));
    }
    if response[1] != REP_SUCCESS {
        return Err(Error::ConnectFailed(response[1]));
    }

    read_address(stream).await
}

/// An unspecified BND.ADDR means the relay lives on the proxy host itself.
async fn relay_addr(stream: &TcpStream, bind: Address) -> Result<SocketAddr> {
    match bind {
        Address::Ip(addr) if addr.ip().is_unspecified() => {
            Ok(SocketAddr::new(stream.peer_addr()?.ip(), addr.port()))
        }
        Address::Ip(addr) => Ok(addr),
        Address::Domain(host, port) => lookup_host((host.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| Error::Protocol(format!("relay host {} did not resolve", host))),
    }
}
