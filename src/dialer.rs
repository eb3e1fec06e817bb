use std::fmt;
use std::io::{Error as IoError, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use log::debug;
use socks5::{Address, Session};
use tokio::net::{lookup_host, TcpStream, UdpSocket};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl Network {
    pub fn is_stream(&self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    pub fn is_packet(&self) -> bool {
        !self.is_stream()
    }

    /// Whether `addr` belongs to the address family this network is pinned to.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp4 | Network::Udp4 => addr.is_ipv4(),
            Network::Tcp6 | Network::Udp6 => addr.is_ipv6(),
            Network::Tcp | Network::Udp => true,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
        };
        f.write_str(s)
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            _ => Err(Error::Config(format!("unknown network {:?}", s))),
        }
    }
}

/// How the relay gets hold of its peer.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Opens a stream to `addr`.
    async fn dial(&self, network: Network, addr: &str) -> Result<TcpStream>;

    /// Opens a datagram endpoint bound locally at `addr` (empty for any).
    async fn listen_packet(&self, network: Network, addr: &str)
        -> Result<Box<dyn PacketEndpoint>>;
}

/// A local datagram socket, possibly tunnelled. Datagrams may arrive from
/// anyone, not only from the address last sent to.
#[async_trait]
pub trait PacketEndpoint: Send + Sync {
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Turns a `host:port` target into the address datagrams are sent to.
    async fn resolve(&self, target: &str) -> Result<Address>;

    async fn send_to(&self, payload: &[u8], target: &Address) -> Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)>;

    /// Resolves with an error if the endpoint stops being usable for reasons
    /// other than its own socket failing. Never resolves by default.
    async fn closed(&self) -> Result<()> {
        futures::future::pending().await
    }
}

/// Go-style local addresses: empty means any address and port, `:port` means
/// any address.
fn bind_addr(network: Network, addr: &str) -> String {
    let any = if network == Network::Udp6 {
        "[::]"
    } else {
        "0.0.0.0"
    };

    if addr.is_empty() {
        format!("{}:0", any)
    } else if addr.starts_with(':') {
        format!("{}{}", any, addr)
    } else {
        addr.to_string()
    }
}

async fn bind_packet(network: Network, addr: &str) -> Result<UdpSocket> {
    if !network.is_packet() {
        return Err(Error::NetworkUnsupported(network));
    }

    let addr = bind_addr(network, addr);
    let bound = UdpSocket::bind(&addr).await;
    bound.map_err(|source| Error::Dial { addr, source })
}

/// Uses the OS network stack as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: Network, addr: &str) -> Result<TcpStream> {
        if !network.is_stream() {
            return Err(Error::NetworkUnsupported(network));
        }

        let resolved = lookup_host(addr).await.map_err(|source| Error::Resolve {
            addr: addr.to_string(),
            source,
        })?;

        let mut last_error = None;
        for peer in resolved.filter(|a| network.accepts(a)) {
            match TcpStream::connect(peer).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("dial {}: {}", peer, e);
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            IoError::new(ErrorKind::AddrNotAvailable, format!("no {} address", network))
        });
        Err(Error::Dial {
            addr: addr.to_string(),
            source,
        })
    }

    async fn listen_packet(
        &self,
        network: Network,
        addr: &str,
    ) -> Result<Box<dyn PacketEndpoint>> {
        let socket = bind_packet(network, addr).await?;
        Ok(Box::new(DirectEndpoint { socket }))
    }
}

/// Picks the first candidate in the local socket's family. An IPv6 socket
/// also reaches IPv4 peers through their v4-mapped address.
fn reachable_peer(local: &SocketAddr, candidates: &[SocketAddr]) -> Option<SocketAddr> {
    let same_family = candidates.iter().find(|a| a.is_ipv4() == local.is_ipv4());
    if let Some(peer) = same_family {
        return Some(*peer);
    }

    if local.is_ipv4() {
        return None;
    }
    candidates.iter().find_map(|a| match a {
        SocketAddr::V4(v4) => Some(SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())),
        SocketAddr::V6(_) => None,
    })
}

pub struct DirectEndpoint {
    socket: UdpSocket,
}

#[async_trait]
impl PacketEndpoint for DirectEndpoint {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Resolves once, locally, to an address the socket can send to.
    async fn resolve(&self, target: &str) -> Result<Address> {
        let local = self.local_addr()?;
        let resolve_error = |source| Error::Resolve {
            addr: target.to_string(),
            source,
        };

        let candidates: Vec<SocketAddr> = lookup_host(target).await.map_err(resolve_error)?.collect();
        reachable_peer(&local, &candidates)
            .map(Address::Ip)
            .ok_or_else(|| resolve_error(IoError::new(ErrorKind::AddrNotAvailable, "no usable address")))
    }

    async fn send_to(&self, payload: &[u8], target: &Address) -> Result<usize> {
        let sent = match target {
            Address::Ip(addr) => self.socket.send_to(payload, addr).await,
            Address::Domain(host, port) => self.socket.send_to(payload, (host.as_str(), *port)).await,
        };
        sent.map_err(Error::Write)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let (n, from) = self.socket.recv_from(buf).await.map_err(Error::Read)?;
        Ok((n, Address::Ip(from)))
    }
}

/// Tunnels every request through a SOCKS5 proxy, one proxy connection per
/// request.
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: String,
}

impl Socks5Dialer {
    pub fn new(proxy: impl Into<String>) -> Self {
        Self {
            proxy: proxy.into(),
        }
    }

    async fn session(&self) -> Result<Session> {
        Session::open(self.proxy.as_str())
            .await
            .map_err(|e| match e {
                socks5::Error::Io(source) => Error::Dial {
                    addr: self.proxy.clone(),
                    source,
                },
                e => Error::Proxy(e),
            })
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(&self, network: Network, addr: &str) -> Result<TcpStream> {
        if !network.is_stream() {
            return Err(Error::NetworkUnsupported(network));
        }

        let destination: Address = addr.parse()?;
        let stream = self.session().await?.connect(&destination).await?;
        Ok(stream)
    }

    async fn listen_packet(
        &self,
        network: Network,
        addr: &str,
    ) -> Result<Box<dyn PacketEndpoint>> {
        let socket = bind_packet(network, addr).await?;
        let socket = self.session().await?.udp_associate(socket).await?;
        Ok(Box::new(Socks5Endpoint { socket }))
    }
}

pub struct Socks5Endpoint {
    socket: socks5::UdpSocket,
}

/// Keeps socket failures in the read/write taxonomy, proxy failures apart.
fn socket_error(e: socks5::Error, io: fn(IoError) -> Error) -> Error {
    match e {
        socks5::Error::Io(e) => io(e),
        e => Error::Proxy(e),
    }
}

#[async_trait]
impl PacketEndpoint for Socks5Endpoint {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Names are left for the proxy to resolve.
    async fn resolve(&self, target: &str) -> Result<Address> {
        Ok(target.parse()?)
    }

    async fn send_to(&self, payload: &[u8], target: &Address) -> Result<usize> {
        self.socket
            .send_to(payload, target)
            .await
            .map_err(|e| socket_error(e, Error::Write))
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        self.socket
            .recv_from(buf)
            .await
            .map_err(|e| socket_error(e, Error::Read))
    }

    async fn closed(&self) -> Result<()> {
        self.socket.closed().await.map_err(Error::Proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn networks() {
        assert_eq!("tcp6".parse::<Network>().unwrap(), Network::Tcp6);
        assert!("sctp".parse::<Network>().is_err());
        assert!(Network::Udp4.is_packet());
        assert!(!Network::Udp.is_stream());
        assert!(Network::Tcp4.accepts(&"1.1.1.1:1".parse().unwrap()));
        assert!(!Network::Tcp4.accepts(&"[::1]:1".parse().unwrap()));
    }

    #[test]
    fn ipv6_sockets_reach_ipv4_peers() {
        let v4: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let v6: SocketAddr = "[::1]:9".parse().unwrap();
        let any4: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let any6: SocketAddr = "[::]:0".parse().unwrap();

        assert_eq!(reachable_peer(&any4, &[v6, v4]), Some(v4));
        assert_eq!(reachable_peer(&any4, &[v6]), None);
        assert_eq!(reachable_peer(&any6, &[v4, v6]), Some(v6));
        assert_eq!(
            reachable_peer(&any6, &[v4]),
            Some("[::ffff:127.0.0.1]:9".parse().unwrap())
        );
        assert_eq!(reachable_peer(&any6, &[]), None);
    }

    #[test]
    fn go_style_bind_addresses() {
        assert_eq!(bind_addr(Network::Udp, ""), "0.0.0.0:0");
        assert_eq!(bind_addr(Network::Udp6, ""), "[::]:0");
        assert_eq!(bind_addr(Network::Udp, ":12345"), "0.0.0.0:12345");
        assert_eq!(bind_addr(Network::Udp, "127.0.0.1:9"), "127.0.0.1:9");
    }
}
