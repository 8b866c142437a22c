//! Scripted loopback WebSocket server for tests.
//!
//! The server side speaks just enough RFC 6455 to drive a [`Transport`]
//! through real TCP: it answers the upgrade request, writes unmasked frames
//! (optionally split into arbitrary chunks) and decodes the client's masked
//! frames.
//!
//! [`Transport`]: crate::Transport

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use crate::frame::{Frame, FrameDecoder, Opcode, close_code};
use crate::handshake::{self, HttpHead};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ScriptedServer {
    listener: TcpListener,
}

impl ScriptedServer {
    pub fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/", self.port())
    }

    /// Accept one client and complete a valid handshake.
    pub fn accept(&self, timeout: Duration) -> io::Result<ServerConn> {
        self.accept_with(timeout, |request| {
            handshake::server_response(request.header("Sec-WebSocket-Key").unwrap_or_default())
                .into_bytes()
        })
    }

    /// Accept one client and answer its upgrade request with the raw bytes
    /// returned by `respond`.
    pub fn accept_with(
        &self,
        timeout: Duration,
        respond: impl FnOnce(&HttpHead) -> Vec<u8>,
    ) -> io::Result<ServerConn> {
        let deadline = Instant::now() + timeout;
        let mut stream = loop {
            match self.listener.accept() {
                Ok((stream, _)) => break stream,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "no client connected"));
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(e),
            }
        };
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_millis(20)))?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            if let Some(end) = handshake::find_head_end(&buf) {
                break end;
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no upgrade request"));
            }
            match stream.read(&mut chunk) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(e),
            }
        };
        let request = HttpHead::parse(&buf[..head_end])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        stream.write_all(&respond(&request))?;

        let mut decoder = FrameDecoder::new(usize::MAX >> 1);
        decoder.feed(&buf[head_end..]);
        Ok(ServerConn {
            stream,
            decoder,
            request,
        })
    }
}

/// Server end of one accepted connection.
pub struct ServerConn {
    stream: TcpStream,
    decoder: FrameDecoder,
    pub request: HttpHead,
}

impl ServerConn {
    pub fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.send_raw(&frame.encode())
    }

    pub fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.send_frame(&Frame::text(text))
    }

    /// Write `bytes` in pieces of at most `chunk` bytes with a short pause
    /// between them, so the client sees several partial reads.
    pub fn send_split(&mut self, bytes: &[u8], chunk: usize) -> io::Result<()> {
        for piece in bytes.chunks(chunk.max(1)) {
            self.send_raw(piece)?;
            std::thread::sleep(Duration::from_millis(15));
        }
        Ok(())
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    pub fn send_close(&mut self, code: u16, reason: &str) -> io::Result<()> {
        self.send_frame(&Frame::close(code, reason))
    }

    /// Next frame from the client, or `Ok(None)` if none arrives in time.
    pub fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => self.decoder.feed(&chunk[..n]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Next Text message from the client, skipping control frames.
    pub fn recv_text(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(frame) = self.recv_frame(remaining)? else {
                return Ok(None);
            };
            match frame.opcode {
                Opcode::Text => {
                    return String::from_utf8(frame.payload)
                        .map(Some)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
                }
                Opcode::Close => return Err(io::ErrorKind::ConnectionAborted.into()),
                _ => continue,
            }
        }
    }

    /// Wait until the client closes its end of the TCP stream.
    pub fn wait_closed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.recv_frame(Duration::from_millis(50)) {
                Ok(_) => {}
                Err(_) => return true,
            }
        }
        false
    }

    /// Send a normal Close and drop the stream.
    pub fn close(mut self) {
        let _ = self.send_close(close_code::NORMAL, "");
    }

    /// Drop the TCP stream without a Close frame.
    pub fn abort(self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Poll a tokio receiver from synchronous test code.
pub fn recv_timeout<T>(rx: &mut UnboundedReceiver<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.try_recv() {
            Ok(item) => return Some(item),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }
}
