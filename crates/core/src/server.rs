use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::error::{Error, Result};
use crate::session::{RtspSession, SessionContext};
use crate::stream::StreamRegistry;
use crate::transport::PortAllocator;

const POLL_TIMEOUT_MS: u16 = 10;
const TICK: Duration = Duration::from_secs(1);

/// Server-level configuration used by sessions and the event loop.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/local address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// RTSP inactivity countdown, also advertised as `Session: ...;timeout=`.
    pub session_timeout_secs: u32,
    /// RTCP inactivity countdown per track.
    pub rtcp_timeout_secs: u32,
    /// First even port handed out for UDP RTP/RTCP pairs.
    pub port_base: u16,
    /// Allocation wraps back to `port_base` past this port.
    pub port_upper: u16,
    /// Stream id requested from the registry for `/streamN`.
    pub default_stream_id: u32,
    /// Upper bound on an RTP packet, header included.
    pub max_packet_len: usize,
    /// Strip ADTS headers from AAC units before packetizing.
    pub aac_strip_adts: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),
            session_timeout_secs: 60,
            rtcp_timeout_secs: 60,
            port_base: 5000,
            port_upper: 8000,
            default_stream_id: 0,
            max_packet_len: crate::media::MAX_PACKET_LEN,
            aac_strip_adts: true,
        }
    }
}

/// RTSP server.
///
/// A single event-loop thread multiplexes the listener and every client
/// connection with `poll(2)`. Media never passes through this thread: frames
/// reach clients from the producer's thread via the stream registry's buses.
pub struct Server {
    bind_addr: String,
    registry: Arc<dyn StreamRegistry>,
    config: Arc<ServerConfig>,
    ports: Arc<PortAllocator>,
    running: Arc<AtomicBool>,
    sessions: Arc<AtomicUsize>,
    local_addr: Option<SocketAddr>,
    worker: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str, registry: Arc<dyn StreamRegistry>) -> Self {
        Self::with_config(bind_addr, registry, ServerConfig::default())
    }

    pub fn with_config(
        bind_addr: &str,
        registry: Arc<dyn StreamRegistry>,
        config: ServerConfig,
    ) -> Self {
        let ports = Arc::new(PortAllocator::new(config.port_base, config.port_upper));
        Self {
            bind_addr: bind_addr.to_string(),
            registry,
            config: Arc::new(config),
            ports,
            running: Arc::new(AtomicBool::new(false)),
            sessions: Arc::new(AtomicUsize::new(0)),
            local_addr: None,
            worker: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let ctx = Arc::new(SessionContext {
            registry: self.registry.clone(),
            ports: self.ports.clone(),
            config: self.config.clone(),
        });

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let sessions = self.sessions.clone();

        let worker = thread::Builder::new()
            .name("rtsp-server".to_string())
            .spawn(move || EventLoop::new(listener, ctx, sessions).run(&running));
        match worker {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        self.local_addr = Some(local_addr);

        tracing::info!(addr = %local_addr, "RTSP server listening");
        Ok(())
    }

    /// Stop the event loop and close every client connection.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        tracing::info!("server stopping");
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("RTSP event loop panicked");
            }
        }
        self.local_addr = None;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of open client connections.
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

struct EventLoop {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    sessions: Vec<RtspSession>,
    count: Arc<AtomicUsize>,
    last_tick: Instant,
}

impl EventLoop {
    fn new(listener: TcpListener, ctx: Arc<SessionContext>, count: Arc<AtomicUsize>) -> Self {
        Self {
            listener,
            ctx,
            sessions: Vec::new(),
            count,
            last_tick: Instant::now(),
        }
    }

    fn run(mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match self.wait() {
                Ok((accept, readable)) => {
                    self.service(&readable);
                    if accept {
                        self.accept_pending();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "poll failed");
                    thread::sleep(Duration::from_millis(u64::from(POLL_TIMEOUT_MS)));
                }
            }

            if self.last_tick.elapsed() >= TICK {
                self.last_tick += TICK;
                self.expire();
            }
            self.count.store(self.sessions.len(), Ordering::SeqCst);
        }

        for session in &mut self.sessions {
            session.close();
        }
        self.sessions.clear();
        self.count.store(0, Ordering::SeqCst);
        tracing::debug!("event loop exited");
    }

    /// Poll the listener and every session. Returns whether the listener is
    /// ready and a readiness flag per session.
    fn wait(&self) -> io::Result<(bool, Vec<bool>)> {
        let interest = PollFlags::POLLIN;
        let mut fds = Vec::with_capacity(self.sessions.len() + 1);
        fds.push(PollFd::new(self.listener.as_fd(), interest));
        fds.extend(self.sessions.iter().map(|s| PollFd::new(s.fd(), interest)));

        match poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok((false, vec![false; self.sessions.len()])),
            Err(e) => return Err(e.into()),
        }

        let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        let mut flags = fds
            .iter()
            .map(|fd| fd.revents().is_some_and(|r| r.intersects(ready)));
        let accept = flags.next().unwrap_or(false);
        Ok((accept, flags.collect()))
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match RtspSession::new(stream, peer, self.ctx.clone()) {
                    Ok(session) => self.sessions.push(session),
                    Err(e) => tracing::warn!(%peer, error = %e, "failed to set up connection"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                    break;
                }
            }
        }
    }

    /// Hand readable sessions their bytes. Walks backwards so `swap_remove`
    /// only moves sessions that were already visited.
    fn service(&mut self, readable: &[bool]) {
        for idx in (0..readable.len()).rev() {
            if readable[idx] && !self.sessions[idx].on_readable() {
                let mut session = self.sessions.swap_remove(idx);
                session.close();
            }
        }
    }

    /// One-second bookkeeping: evict sessions whose RTSP and RTCP countdowns
    /// have both run out.
    fn expire(&mut self) {
        self.sessions.retain_mut(|session| {
            if !session.tick() {
                return true;
            }
            tracing::info!(
                session_id = %session.id(),
                peer = %session.peer(),
                "session timed out"
            );
            session.close();
            false
        });
    }
}
