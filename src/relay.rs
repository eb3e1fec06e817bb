use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

use log::{debug, info, warn};
use socks5::Address;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::codec::{format_bytes, parse_bytes};
use crate::config::{Config, LineBreak, Mode, Transport};
use crate::dialer::{Dialer, Network, PacketEndpoint};
use crate::error::{Error, Result};

/// Receive buffer for one datagram, relay header included.
pub const UDP_BUFFER_LEN: usize = 65536;

/// Moves lines from `input` to a peer and prints what comes back on
/// `output`.
///
/// Two flows run per session: a spawned task drains `input` into the
/// connection, and the caller's task reads the connection and prints. The
/// session ends when the reading side ends or either side fails; the other
/// flow is then dropped along with its half of the connection.
pub struct RelayEngine<I, O> {
    config: Config,
    input: I,
    output: O,
}

impl<I, O> RelayEngine<I, O>
where
    I: AsyncBufRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin,
{
    pub fn new(config: Config, input: I, output: O) -> Self {
        Self {
            config,
            input,
            output,
        }
    }

    /// Opens the peer through `dialer` and relays until the session ends.
    pub async fn run(self, dialer: &dyn Dialer) -> Result<()> {
        match self.config.transport {
            Transport::Tcp => {
                let stream = dialer.dial(Network::Tcp, &self.config.target).await?;
                debug!("connected to {}", self.config.target);
                self.run_stream(stream).await
            }
            Transport::Udp => {
                let listen = self.config.listen.as_deref().unwrap_or("");
                let endpoint: Arc<dyn PacketEndpoint> =
                    Arc::from(dialer.listen_packet(Network::Udp, listen).await?);
                info!("local addr = {}", endpoint.local_addr()?);

                let target = endpoint.resolve(&self.config.target).await?;
                self.run_packet(endpoint, target).await
            }
        }
    }

    pub async fn run_stream(self, stream: TcpStream) -> Result<()> {
        let (reader, writer) = stream.into_split();
        self.run_io(reader, writer).await
    }

    /// Stream relay over any pair of halves. Ends with `Ok` when `reader`
    /// reaches end of stream.
    pub async fn run_io<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            config,
            input,
            mut output,
        } = self;

        let mut sender = tokio::spawn(send_stream(input, writer, config.mode, config.linebreak));

        let result = tokio::select! {
            result = receive_stream(reader, &mut output, config.mode, config.buffer_len) => result,
            result = until_failed(&mut sender) => result,
        };

        sender.abort();
        result
    }

    /// Datagram relay. There is no end of stream here: only a socket error
    /// or the endpoint closing ends it.
    pub async fn run_packet(self, endpoint: Arc<dyn PacketEndpoint>, target: Address) -> Result<()> {
        let Self {
            config,
            input,
            mut output,
        } = self;

        let mut sender = tokio::spawn(send_packets(
            input,
            endpoint.clone(),
            target,
            config.mode,
            config.linebreak,
        ));

        let result = tokio::select! {
            result = receive_packets(&*endpoint, &mut output, config.mode, config.buffer_len) => result,
            result = until_failed(&mut sender) => result,
            result = endpoint.closed() => result,
        };

        sender.abort();
        result
    }
}

/// Turns one input line into the bytes put on the wire, or `None` when the
/// line is skipped.
///
/// Text lines get the line break appended. In binary mode a line starting
/// with `!` is sent as text the same way, any other line is parsed as byte
/// literals and sent exactly; blank lines and lines that fail to parse are
/// skipped.
pub fn encode_line(line: &[u8], mode: Mode, linebreak: LineBreak) -> Option<Vec<u8>> {
    match mode {
        Mode::Text => Some([line, linebreak.as_bytes()].concat()),
        Mode::Binary => match line.split_first() {
            None => None,
            Some((b'!', text)) => Some([text, linebreak.as_bytes()].concat()),
            Some(_) => match parse_bytes(&String::from_utf8_lossy(line)) {
                Ok(bytes) if bytes.is_empty() => None,
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Invalid input: {}", e);
                    None
                }
            },
        },
    }
}

/// Reads the next `\n` terminated line into `line` without its terminator
/// (and without a `\r` before it). Returns `false` at end of input.
async fn next_line<R: AsyncBufRead + Unpin>(input: &mut R, line: &mut Vec<u8>) -> Result<bool> {
    line.clear();
    let n = input.read_until(b'\n', line).await.map_err(Error::Input)?;
    if n == 0 {
        return Ok(false);
    }

    trim_line_end(line);
    Ok(true)
}

fn trim_line_end(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

/// Waits for the sending task and only returns if it failed; a sender that
/// ran out of input leaves the session to the reader.
async fn until_failed(sender: &mut JoinHandle<Result<()>>) -> Result<()> {
    match sender.await {
        Ok(Ok(())) => futures::future::pending().await,
        Ok(Err(e)) => Err(e),
        Err(e) => Err(Error::Io(IoError::new(ErrorKind::Other, e.to_string()))),
    }
}

async fn print<O: AsyncWrite + Unpin>(output: &mut O, line: &[u8]) -> Result<()> {
    output.write_all(line).await.map_err(Error::Output)?;
    output.write_all(b"\n").await.map_err(Error::Output)?;
    output.flush().await.map_err(Error::Output)
}

async fn send_stream<I, W>(mut input: I, mut writer: W, mode: Mode, linebreak: LineBreak) -> Result<()>
where
    I: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    while next_line(&mut input, &mut line).await? {
        if let Some(payload) = encode_line(&line, mode, linebreak) {
            writer.write_all(&payload).await.map_err(Error::Write)?;
        }
    }

    debug!("input closed, shutting down write side");
    if let Err(e) = writer.shutdown().await {
        debug!("shutdown: {}", e);
    }
    Ok(())
}

async fn receive_stream<R, O>(reader: R, output: &mut O, mode: Mode, buffer_len: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    match mode {
        Mode::Text => {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                let n = reader.read_until(b'\n', &mut line).await.map_err(Error::Read)?;
                if n == 0 {
                    return Ok(());
                }
                trim_line_end(&mut line);
                print(output, &line).await?;
            }
        }
        Mode::Binary => {
            let mut reader = reader;
            let mut buf = vec![0u8; buffer_len];
            loop {
                let n = reader.read(&mut buf).await.map_err(Error::Read)?;
                if n == 0 {
                    return Ok(());
                }
                print(output, format_bytes(&buf[..n]).as_bytes()).await?;
            }
        }
    }
}

async fn send_packets<I>(
    mut input: I,
    endpoint: Arc<dyn PacketEndpoint>,
    target: Address,
    mode: Mode,
    linebreak: LineBreak,
) -> Result<()>
where
    I: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    while next_line(&mut input, &mut line).await? {
        if let Some(payload) = encode_line(&line, mode, linebreak) {
            endpoint.send_to(&payload, &target).await?;
        }
    }

    debug!("input closed");
    Ok(())
}

async fn receive_packets<O>(
    endpoint: &dyn PacketEndpoint,
    output: &mut O,
    mode: Mode,
    buffer_len: usize,
) -> Result<()>
where
    O: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; UDP_BUFFER_LEN];
    loop {
        let (n, from) = endpoint.recv_from(&mut buf).await?;
        if n == 0 {
            debug!("empty datagram from {}", from);
            continue;
        }

        info!("recv from {}", from);
        match mode {
            Mode::Text => print(output, &buf[..n]).await?,
            Mode::Binary => {
                for chunk in buf[..n].chunks(buffer_len) {
                    print(output, format_bytes(chunk).as_bytes()).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lines_get_the_line_break() {
        assert_eq!(
            encode_line(b"hello", Mode::Text, LineBreak::CrLf).unwrap(),
            b"hello\r\n"
        );
        assert_eq!(encode_line(b"", Mode::Text, LineBreak::Lf).unwrap(), b"\n");
    }

    #[test]
    fn binary_lines_are_exact() {
        assert_eq!(
            encode_line(b"0x1a 0b101 017 42", Mode::Binary, LineBreak::Lf).unwrap(),
            vec![0x1a, 0x05, 0x17, 0x42]
        );
    }

    #[test]
    fn bang_escapes_text_in_binary_mode() {
        assert_eq!(
            encode_line(b"!GET / 01", Mode::Binary, LineBreak::Cr).unwrap(),
            b"GET / 01\r"
        );
        assert_eq!(encode_line(b"!", Mode::Binary, LineBreak::Lf).unwrap(), b"\n");
    }

    #[test]
    fn skipped_binary_lines() {
        assert_eq!(encode_line(b"", Mode::Binary, LineBreak::Lf), None);
        assert_eq!(encode_line(b"   ", Mode::Binary, LineBreak::Lf), None);
        assert_eq!(encode_line(b"01 0xgg", Mode::Binary, LineBreak::Lf), None);
    }

    #[tokio::test]
    async fn lines_lose_their_terminators() {
        let mut input: &[u8] = b"one\r\ntwo\nthree";
        let mut line = Vec::new();
        let mut lines = Vec::new();
        while next_line(&mut input, &mut line).await.unwrap() {
            lines.push(String::from_utf8(line.clone()).unwrap());
        }
        assert_eq!(lines, ["one", "two", "three"]);
    }
}
