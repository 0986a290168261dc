use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use chatchime_common::config::{ConnectionConfig, ListenerSettings};
use chatchime_common::protocol::{LINE_TERMINATOR, is_timeout, join_line, nick_line, pass_line};

use crate::error::ListenerError;

/// One live chat server connection.
#[derive(Debug)]
pub struct Connection {
    reader: TcpStream,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
}

impl Connection {
    /// Connect to the configured server and send the `PASS`/`NICK`/`JOIN` handshake.
    ///
    /// The config is validated first, so a missing token or channel fails before
    /// any network traffic. Reads on the returned connection time out after
    /// `settings.read_timeout`.
    pub fn open(config: &ConnectionConfig, settings: &ListenerSettings) -> Result<Self, ListenerError> {
        config.validate()?;

        let stream = connect_any(&config.server_host, config.server_port, settings.connect_timeout)?;
        let peer = stream.peer_addr()?;

        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(settings.read_timeout))?;
        stream.set_write_timeout(Some(settings.connect_timeout))?;

        let reader = stream.try_clone()?;
        let writer = BufWriter::new(stream);
        let mut conn = Self {
            reader,
            writer,
            peer,
        };

        conn.send_line(&pass_line(&config.token))?;
        conn.send_line(&nick_line(&config.nickname))?;
        conn.send_line(&join_line(&config.channel))?;
        debug!("[listener] Handshake sent to {peer}");

        Ok(conn)
    }

    /// Write one protocol line followed by CRLF and flush it.
    pub fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(LINE_TERMINATOR)?;
        self.writer.flush()
    }

    /// Read whatever bytes are available.
    ///
    /// Returns `Ok(None)` when the read timed out with nothing to read, and
    /// `Ok(Some(0))` when the server closed the connection.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.reader.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Close both directions. Errors are ignored; the socket may already be gone.
    pub fn shutdown(&self) {
        let _ = self.reader.shutdown(Shutdown::Both);
    }
}

/// Resolve `host` and try each address in turn.
fn connect_any(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ListenerError> {
    let resolve_err = || ListenerError::Resolve {
        host: host.to_string(),
    };
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| resolve_err())?
        .collect();
    if addrs.is_empty() {
        return Err(resolve_err());
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("[listener] Connect to {addr} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(ListenerError::Transport(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotConnected, "no address connected")
    })))
}
