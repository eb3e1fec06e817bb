use std::io::{Error as IoError, ErrorKind};
use std::net::SocketAddr;

use log::debug;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::proto::{Address, MAX_ADDR_LEN};

/// RSV(2) + FRAG(1) ahead of the destination address.
const HEADER_PREFIX_LEN: usize = 3;

/// Builds `RSV RSV FRAG=0 | ATYP | DST.ADDR | DST.PORT | payload`.
pub fn encode_datagram(destination: &Address, payload: &[u8]) -> Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(HEADER_PREFIX_LEN + MAX_ADDR_LEN + payload.len());
    packet.extend_from_slice(&[0, 0, 0]);
    destination.write_to(&mut packet)?;
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Splits a relay datagram into the origin address and the payload.
/// Fragmented datagrams are not supported and are reported as errors.
pub fn decode_datagram(packet: &[u8]) -> Result<(Address, &[u8])> {
    if packet.len() < HEADER_PREFIX_LEN {
        return Err(Error::Protocol("short relay datagram".to_string()));
    }
    if packet[2] != 0 {
        let error = format!("fragmented relay datagram (frag {})", packet[2]);
        return Err(Error::Protocol(error));
    }

    let (addr, len) = Address::decode(&packet[HEADER_PREFIX_LEN..])?;
    Ok((addr, &packet[HEADER_PREFIX_LEN + len..]))
}

/// A local UDP socket whose traffic is tunnelled through a SOCKS5 relay.
///
/// Holds the TCP connection that owns the association; dropping the socket
/// closes it and ends the association on the proxy side.
pub struct UdpSocket {
    socket: tokio::net::UdpSocket,
    relay: SocketAddr,
    control: TcpStream,
}

impl UdpSocket {
    pub(crate) fn new(socket: tokio::net::UdpSocket, relay: SocketAddr, control: TcpStream) -> Self {
        Self {
            socket,
            relay,
            control,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay
    }

    /// Sends `payload` to `destination` by way of the relay. Returns the
    /// payload length, not counting the header.
    pub async fn send_to(&self, payload: &[u8], destination: &Address) -> Result<usize> {
        let packet = encode_datagram(destination, payload)?;
        self.socket.send_to(&packet, self.relay).await?;
        Ok(payload.len())
    }

    /// Receives the next well-formed relay datagram and returns the origin
    /// the relay reports for it. The datagram lands in `buf` header and all,
    /// then the payload is moved to the front, so `buf` needs room for the
    /// header on top of the payload; anything beyond is truncated like a
    /// plain UDP read.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        loop {
            let (n, from) = self.socket.recv_from(buf).await?;
            let (addr, len) = match decode_datagram(&buf[..n]) {
                Ok((addr, payload)) => (addr, payload.len()),
                Err(e) => {
                    debug!("socks5: dropped datagram from {}: {}", from, e);
                    continue;
                }
            };

            buf.copy_within(n - len..n, 0);
            return Ok((len, addr));
        }
    }

    /// Resolves once the proxy closes the association's TCP connection.
    pub async fn closed(&self) -> Result<()> {
        let mut buffer = [0u8; 1024];
        loop {
            self.control.readable().await?;
            match self.control.try_read(&mut buffer) {
                Ok(0) => {
                    return Err(Error::Io(IoError::new(
                        ErrorKind::ConnectionAborted,
                        "holding tcp conn of udp was closed",
                    )))
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wraps_payload() {
        let dst = Address::Ip("8.8.8.8:53".parse().unwrap());
        let packet = encode_datagram(&dst, b"\x12\x34").unwrap();
        assert_eq!(packet, [0, 0, 0, 1, 8, 8, 8, 8, 0, 53, 0x12, 0x34]);

        let (addr, payload) = decode_datagram(&packet).unwrap();
        assert_eq!(addr, dst);
        assert_eq!(payload, b"\x12\x34");
    }

    #[test]
    fn drops_fragments_and_garbage() {
        let dst = Address::Domain("a.b".to_string(), 7);
        let mut packet = encode_datagram(&dst, b"x").unwrap();
        packet[2] = 1;
        assert!(decode_datagram(&packet).is_err());
        assert!(decode_datagram(&[0, 0]).is_err());
        assert!(decode_datagram(&[0, 0, 0, 1, 127]).is_err());
    }

    #[test]
    fn empty_payload_is_allowed() {
        let dst = Address::Ip("[::1]:9".parse().unwrap());
        let packet = encode_datagram(&dst, &[]).unwrap();
        let (addr, payload) = decode_datagram(&packet).unwrap();
        assert_eq!(addr, dst);
        assert!(payload.is_empty());
    }
}
