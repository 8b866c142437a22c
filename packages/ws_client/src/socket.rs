//! Thin blocking TCP socket wrapper.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::WsError;

/// Outcome of a single bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    Data(usize),
    /// The read timeout elapsed without data.
    Timeout,
    /// The peer closed the stream.
    Closed,
}

#[derive(Debug)]
pub struct Socket {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Socket {
    /// Resolve `host` and try each address in turn, each bounded by `timeout`.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, WsError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| WsError::Resolve {
                host: host.to_string(),
                source,
            })?;

        let mut last = WsError::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        };
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(Self::from_stream(stream, addr)?),
                Err(source) => {
                    debug!(%addr, error = %source, "connect attempt failed");
                    last = WsError::Connect {
                        addr: addr.to_string(),
                        source,
                    };
                }
            }
        }
        Err(last)
    }

    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    pub fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_write_timeout(Some(timeout))
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<Recv> {
        match self.stream.read(buf) {
            Ok(0) => Ok(Recv::Closed),
            Ok(n) => Ok(Recv::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(Recv::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    pub fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    /// Best-effort shutdown of both directions.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_send_recv_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = Socket::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        client.send_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        client.set_read_timeout(Duration::from_millis(20)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(client.recv(&mut buf).unwrap(), Recv::Timeout);

        drop(server);
        assert_eq!(client.recv(&mut buf).unwrap(), Recv::Closed);
    }

    #[test]
    fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Socket::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_connect_failure());
    }
}
