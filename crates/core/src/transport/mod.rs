//! RTP media transports.
//!
//! Media negotiated by `SETUP` leaves the server over one of two carriers:
//!
//! - **UDP** ([`udp`]): a pair of sockets (RTP on an even port, RTCP on the
//!   next odd one) bound from the [`PortAllocator`], sending to the client's
//!   `client_port` pair.
//!
//! - **TCP interleaved** ([`tcp`], RFC 2326 §10.12): RTP is multiplexed onto
//!   the RTSP control connection with `$` framing:
//!
//!   ```text
//!   +-----+---------+----------------+-------------------+
//!   | '$' | channel | length (u16 BE)| RTP/RTCP packet   |
//!   +-----+---------+----------------+-------------------+
//!   ```
//!
//! Both carry an RTCP inactivity countdown. UDP resets it whenever an RTCP
//! datagram arrives; TCP resets it on every successful send since a live
//! control connection implies a live receiver. The countdown is read through
//! an [`RtcpWatch`], which the server ticks without touching the send path.

pub mod ports;
pub mod tcp;
pub mod udp;

use std::io::{self, Write};
use std::net::{TcpStream, UdpSocket};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::media::rtp::RtpPacket;

pub use ports::PortAllocator;
pub use tcp::InterleavedTransport;
pub use udp::UdpTransport;

/// Outbound path for one media stream.
pub trait RtpTransport: Send {
    /// Send one packet. Errors are per-packet unless
    /// [`is_closed`](Self::is_closed) turns true.
    fn send_rtp(&mut self, packet: &RtpPacket<'_>) -> io::Result<()>;

    /// Handle on this transport's RTCP countdown.
    fn rtcp_watch(&self) -> RtcpWatch;

    /// The carrier is gone for good; further sends fail immediately.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Whole-second inactivity countdown.
#[derive(Debug)]
pub struct RtcpTimer {
    timeout: u32,
    remaining: AtomicU32,
}

impl RtcpTimer {
    pub fn new(timeout_secs: u32) -> Self {
        Self {
            timeout: timeout_secs,
            remaining: AtomicU32::new(timeout_secs),
        }
    }

    pub fn reset(&self) {
        self.remaining.store(self.timeout, Ordering::Relaxed);
    }

    /// Decrement by one second, saturating at zero.
    pub fn tick(&self) -> u32 {
        let previous = self
            .remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| Some(r.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Relaxed)
    }
}

/// Shared view of one transport's RTCP liveness.
///
/// The sender keeps resetting the timer while the server loop ticks it. For
/// UDP the watch also owns the receive side of the RTCP socket and drains it
/// on every tick.
#[derive(Debug, Clone)]
pub struct RtcpWatch {
    timer: Arc<RtcpTimer>,
    socket: Option<Arc<UdpSocket>>,
}

impl RtcpWatch {
    pub fn new(timer: Arc<RtcpTimer>) -> Self {
        Self { timer, socket: None }
    }

    /// Watch that also counts datagrams arriving on a non-blocking `socket`.
    pub fn with_socket(timer: Arc<RtcpTimer>, socket: Arc<UdpSocket>) -> Self {
        Self {
            timer,
            socket: Some(socket),
        }
    }

    /// One-second tick. Returns the remaining countdown.
    pub fn tick(&self) -> u32 {
        self.drain();
        self.timer.tick()
    }

    pub fn remaining(&self) -> u32 {
        self.timer.remaining()
    }

    fn drain(&self) {
        let Some(socket) = &self.socket else {
            return;
        };
        let mut scratch = [0u8; 1500];
        let mut received = 0usize;
        loop {
            match socket.recv_from(&mut scratch) {
                Ok((n, _)) => received += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(error = %e, "RTCP receive failed");
                    break;
                }
            }
        }
        if received > 0 {
            tracing::trace!(bytes = received, "RTCP activity");
            self.timer.reset();
        }
    }
}

/// Write all of `data` to a non-blocking stream, waiting for writability
/// when the socket buffer is full. Fails with `TimedOut` once `timeout` has
/// elapsed without finishing.
pub(crate) fn write_all_nonblocking(
    stream: &mut TcpStream,
    mut data: &[u8],
    timeout: Duration,
) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                let wait_ms = left.as_millis().min(u16::MAX as u128) as u16;
                let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLOUT)];
                match poll(&mut fds, PollTimeout::from(wait_ms)) {
                    Ok(_) => {}
                    Err(nix::errno::Errno::EINTR) => {}
                    Err(errno) => return Err(errno.into()),
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
