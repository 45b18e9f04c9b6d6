//! RTSP sessions (RFC 2326 §3, §12.37).
//!
//! One [`RtspSession`] exists per accepted control connection. It owns the
//! connection's read side, frames and dispatches requests, and holds up to
//! one video and one audio [`MediaHandler`].
//!
//! ## State machine
//!
//! ```text
//!            DESCRIBE          SETUP           PLAY
//!   Idle ─────────────► Described ─────► Setup ─────► Playing
//!                                        │  ▲ SETUP (2nd track)
//!                                        └──┘
//!   TEARDOWN / socket error / timeout (any state) ─────► Closed
//! ```
//!
//! OPTIONS, GET_PARAMETER and SET_PARAMETER are accepted in every state
//! without a transition. A method used in the wrong state is answered with
//! 455 and leaves the state untouched.
//!
//! ## Timeouts
//!
//! The server ticks every session once per second. The RTSP countdown is
//! reset by any request; the RTCP countdown lives in each track's transport.
//! A session is evicted when both reach zero.

pub mod media;
mod methods;
pub mod transport;

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Error, ParseErrorKind};
use crate::media::Packetizer;
use crate::protocol::{RtspResponse, take_request};
use crate::server::ServerConfig;
use crate::stream::{FrameObserver, StreamBus, StreamRegistry};
use crate::transport::{PortAllocator, tcp::skip_interleaved, write_all_nonblocking};

pub use media::MediaHandler;

/// Requests whose unparsed backlog exceeds this size close the connection.
pub const MAX_REQUEST_BACKLOG: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// RTSP protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Described,
    Setup,
    Playing,
    Closed,
}

/// Shared collaborators every session needs.
pub struct SessionContext {
    pub registry: Arc<dyn StreamRegistry>,
    pub ports: Arc<PortAllocator>,
    pub config: Arc<ServerConfig>,
}

/// Per-connection RTSP state.
pub struct RtspSession {
    id: String,
    peer: SocketAddr,
    stream: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    state: SessionState,
    channel: Option<u32>,
    stream_id: u32,
    last_cseq: Option<String>,
    rtsp_remaining: u32,
    video: Option<Arc<MediaHandler>>,
    audio: Option<Arc<MediaHandler>>,
    /// Packetizers built for DESCRIBE, taken by SETUP.
    offered_video: Option<Box<dyn Packetizer>>,
    offered_audio: Option<Box<dyn Packetizer>>,
    bus: Option<Arc<StreamBus>>,
    inbuf: Vec<u8>,
    ctx: Arc<SessionContext>,
}

fn generate_session_id() -> String {
    format!("{:016X}", rand::rng().random::<u64>())
}

impl RtspSession {
    /// Wrap an accepted connection. The socket is switched to non-blocking.
    pub fn new(stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        let id = generate_session_id();

        tracing::info!(session_id = %id, %peer, "client connected");

        Ok(Self {
            id,
            peer,
            stream,
            writer: Arc::new(Mutex::new(writer)),
            state: SessionState::Idle,
            channel: None,
            stream_id: ctx.config.default_stream_id,
            last_cseq: None,
            rtsp_remaining: ctx.config.session_timeout_secs,
            video: None,
            audio: None,
            offered_video: None,
            offered_audio: None,
            bus: None,
            inbuf: Vec::new(),
            ctx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> Option<u32> {
        self.channel
    }

    pub fn last_cseq(&self) -> Option<&str> {
        self.last_cseq.as_deref()
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    /// Read whatever is available and answer every complete request.
    ///
    /// Returns `false` when the connection is finished: peer closed, read
    /// error, TEARDOWN, or an oversized unparsed backlog.
    pub fn on_readable(&mut self) -> bool {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::info!(session_id = %self.id, peer = %self.peer, "connection closed by client");
                    return false;
                }
                Ok(n) => self.inbuf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(session_id = %self.id, peer = %self.peer, error = %e, "read error");
                    return false;
                }
            }
        }

        loop {
            let (skipped, any) = skip_interleaved(&self.inbuf);
            if any {
                self.inbuf.drain(..skipped);
                self.rtsp_remaining = self.ctx.config.session_timeout_secs;
            }

            match take_request(&mut self.inbuf) {
                Ok(Some(request)) => {
                    self.rtsp_remaining = self.ctx.config.session_timeout_secs;
                    let response = self.handle(&request);
                    if !self.send_response(&response) {
                        return false;
                    }
                    if self.state == SessionState::Closed {
                        return false;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(session_id = %self.id, peer = %self.peer, error = %e, "malformed request");
                    let (cseq, fatal) = match &e {
                        Error::Parse { kind, cseq } => {
                            (cseq.as_deref(), *kind == ParseErrorKind::BodyTooLarge)
                        }
                        _ => (None, false),
                    };
                    let response = RtspResponse::bad_request().for_request(cseq);
                    // The announced body never gets consumed, so the stream
                    // cannot be reframed.
                    if !self.send_response(&response) || fatal {
                        return false;
                    }
                }
            }
        }

        if self.inbuf.len() > MAX_REQUEST_BACKLOG {
            tracing::warn!(
                session_id = %self.id,
                peer = %self.peer,
                backlog = self.inbuf.len(),
                "request backlog too large"
            );
            return false;
        }
        true
    }

    fn send_response(&self, response: &RtspResponse) -> bool {
        tracing::debug!(
            session_id = %self.id,
            status = response.status.code(),
            "response"
        );
        let bytes = response.serialize();
        let mut writer = self.writer.lock();
        match write_all_nonblocking(&mut writer, bytes.as_bytes(), RESPONSE_TIMEOUT) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id = %self.id, peer = %self.peer, error = %e, "write error");
                false
            }
        }
    }

    /// One-second tick. Returns `true` once both the RTSP and the RTCP
    /// countdowns have run out.
    pub fn tick(&mut self) -> bool {
        self.rtsp_remaining = self.rtsp_remaining.saturating_sub(1);
        let rtcp_remaining = self
            .handlers()
            .map(|h| h.tick())
            .max()
            .unwrap_or(0);
        self.rtsp_remaining == 0 && rtcp_remaining == 0
    }

    fn handlers(&self) -> impl Iterator<Item = &Arc<MediaHandler>> {
        self.video.iter().chain(self.audio.iter())
    }

    /// Stop media, release the stream and shut the socket down.
    pub fn close(&mut self) {
        self.release_media();
        self.state = SessionState::Closed;
        let _ = self.stream.shutdown(Shutdown::Both);
        tracing::info!(session_id = %self.id, peer = %self.peer, "session closed");
    }

    fn release_media(&mut self) {
        let handlers: Vec<Arc<MediaHandler>> =
            self.video.take().into_iter().chain(self.audio.take()).collect();
        for handler in &handlers {
            handler.stop();
        }

        if let Some(bus) = self.bus.take() {
            for handler in handlers {
                let observer: Arc<dyn FrameObserver> = handler;
                bus.unregister(&observer);
            }
            if bus.observer_count() == 0 {
                self.ctx.registry.del_stream(bus.channel(), bus.stream_id());
            }
        }
        self.offered_video = None;
        self.offered_audio = None;
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        self.release_media();
    }
}
