use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

pub(crate) const VER: u8 = 5;
pub(crate) const NO_AUTH: u8 = 0;
pub(crate) const NO_ACCEPTABLE_METHODS: u8 = 0xff;

pub(crate) const CMD_CONNECT: u8 = 1;
pub(crate) const CMD_UDP_ASSOCIATE: u8 = 3;

pub(crate) const ATYP_IPV4: u8 = 1;
pub(crate) const ATYP_IPV6: u8 = 4;
pub(crate) const ATYP_DOMAIN: u8 = 3;

pub(crate) const REP_SUCCESS: u8 = 0;

/// Largest encoded address: ATYP, length byte, 255 name bytes, port.
pub(crate) const MAX_ADDR_LEN: usize = 1 + 1 + 255 + 2;

/// Reason text for a REP code as listed in RFC 1928.
pub fn reply_message(code: &u8) -> &'static str {
    match *code {
        0x00 => "succeeded",
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned",
    }
}

/// Destination as it travels on the wire: either a resolved socket address
/// or a name left for the proxy to resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Appends `ATYP | ADDR | PORT`.
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Address::Ip(SocketAddr::V4(addr)) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&addr.ip().octets());
            }
            Address::Ip(SocketAddr::V6(addr)) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&addr.ip().octets());
            }
            Address::Domain(host, _) => {
                let len = u8::try_from(host.len()).map_err(|_| Error::DomainTooLong(host.len()))?;
                buf.push(ATYP_DOMAIN);
                buf.push(len);
                buf.extend_from_slice(host.as_bytes());
            }
        }
        buf.extend_from_slice(&self.port().to_be_bytes());
        Ok(())
    }

    /// Parses `ATYP | ADDR | PORT` from the front of `buf`, returning the
    /// address and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<(Address, usize)> {
        let truncated = || Error::Protocol("truncated address".to_string());

        let (&atyp, rest) = buf.split_first().ok_or_else(truncated)?;
        let (addr, len) = match atyp {
            ATYP_IPV4 => {
                let octets: [u8; 4] = take(rest).ok_or_else(truncated)?;
                let port = read_port(&rest[4..]).ok_or_else(truncated)?;
                let addr = SocketAddrV4::new(Ipv4Addr::from(octets), port);
                (Address::Ip(SocketAddr::V4(addr)), 4 + 2)
            }
            ATYP_IPV6 => {
                let octets: [u8; 16] = take(rest).ok_or_else(truncated)?;
                let port = read_port(&rest[16..]).ok_or_else(truncated)?;
                let addr = SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0);
                (Address::Ip(SocketAddr::V6(addr)), 16 + 2)
            }
            ATYP_DOMAIN => {
                let (&n, rest) = rest.split_first().ok_or_else(truncated)?;
                let n = n as usize;
                let name = rest.get(..n).ok_or_else(truncated)?;
                let port = read_port(&rest[n..]).ok_or_else(truncated)?;
                let host = String::from_utf8(name.to_vec())
                    .map_err(|_| Error::Protocol("invalid domain".to_string()))?;
                (Address::Domain(host, port), 1 + n + 2)
            }
            t => return Err(Error::Protocol(format!("unknown address type {}", t))),
        };

        Ok((addr, 1 + len))
    }
}

fn take<const N: usize>(buf: &[u8]) -> Option<[u8; N]> {
    buf.get(..N)?.try_into().ok()
}

fn read_port(buf: &[u8]) -> Option<u16> {
    take(buf).map(u16::from_be_bytes)
}

/// Reads one encoded address off a stream, pulling only as many bytes as
/// its ATYP calls for.
pub(crate) async fn read_address<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Address> {
    let atyp = reader.read_u8().await?;
    let mut buf = vec![atyp];

    let remaining = match atyp {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let n = reader.read_u8().await?;
            buf.push(n);
            n as usize + 2
        }
        t => return Err(Error::Protocol(format!("unknown address type {}", t))),
    };

    let start = buf.len();
    buf.resize(start + remaining, 0);
    reader.read_exact(&mut buf[start..]).await?;

    Address::decode(&buf).map(|(addr, _)| addr)
}

impl FromStr for Address {
    type Err = Error;

    /// Accepts `ip:port`, `[ipv6]:port` and `host:port`.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Address::Ip(addr));
        }

        let invalid = || Error::Protocol(format!("invalid address {:?}", s));
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || host.contains(':') {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Address::Domain(host.to_string(), port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(addr) => write!(f, "{}", addr),
            Address::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_each_address_type() {
        let mut buf = Vec::new();
        Address::Ip("1.2.3.4:80".parse().unwrap())
            .write_to(&mut buf)
            .unwrap();
        assert_eq!(buf, [ATYP_IPV4, 1, 2, 3, 4, 0, 80]);

        let mut buf = Vec::new();
        Address::Domain("example.com".to_string(), 443)
            .write_to(&mut buf)
            .unwrap();
        assert_eq!(buf[0], ATYP_DOMAIN);
        assert_eq!(buf[1], 11);
        assert_eq!(&buf[2..13], b"example.com");
        assert_eq!(&buf[13..], &443u16.to_be_bytes());

        let mut buf = Vec::new();
        Address::Ip("[::1]:53".parse().unwrap())
            .write_to(&mut buf)
            .unwrap();
        assert_eq!(buf.len(), 1 + 16 + 2);
        assert_eq!(buf[0], ATYP_IPV6);
        assert_eq!(buf[16], 1);
    }

    #[test]
    fn rejects_overlong_domain() {
        let host = "a".repeat(256);
        let err = Address::Domain(host, 80).write_to(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::DomainTooLong(256)));
    }

    #[test]
    fn decode_reports_consumed_length() {
        let mut buf = Vec::new();
        let addr = Address::Domain("relay.local".to_string(), 1080);
        addr.write_to(&mut buf).unwrap();
        buf.extend_from_slice(b"payload");

        let (decoded, len) = Address::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(&buf[len..], b"payload");
    }

    #[test]
    fn decode_rejects_truncated_and_unknown() {
        assert!(matches!(
            Address::decode(&[ATYP_IPV4, 1, 2, 3]),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(Address::decode(&[9, 0, 0]), Err(Error::Protocol(_))));
        assert!(matches!(Address::decode(&[]), Err(Error::Protocol(_))));
    }

    #[test]
    fn parses_target_strings() {
        assert_eq!(
            "127.0.0.1:53".parse::<Address>().unwrap(),
            Address::Ip("127.0.0.1:53".parse().unwrap())
        );
        assert_eq!(
            "google.com:80".parse::<Address>().unwrap(),
            Address::Domain("google.com".to_string(), 80)
        );
        assert!("google.com".parse::<Address>().is_err());
        assert!(":80".parse::<Address>().is_err());
        assert!("host:99999".parse::<Address>().is_err());
    }

    #[tokio::test]
    async fn reads_address_from_stream() {
        let mut wire: &[u8] = &[ATYP_DOMAIN, 3, b'f', b'o', b'o', 0x1f, 0x90, 0xaa];
        let addr = read_address(&mut wire).await.unwrap();
        assert_eq!(addr, Address::Domain("foo".to_string(), 8080));
        assert_eq!(wire, &[0xaa]);
    }
}
