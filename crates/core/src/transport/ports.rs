use std::net::{Ipv4Addr, UdpSocket};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Hands out even/odd UDP port pairs for RTP/RTCP.
///
/// Starts at `base`, advances by 2 per allocation and wraps back to `base`
/// once past `upper`. A candidate pair is accepted when both ports can be
/// bound; the probe sockets are closed again before returning, so another
/// process may still take the port before the transport binds it.
///
/// One allocator is owned by the server and shared with every session.
#[derive(Debug)]
pub struct PortAllocator {
    next: Mutex<u16>,
    base: u16,
    upper: u16,
}

fn probe(port: u16) -> bool {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

impl PortAllocator {
    pub fn new(base: u16, upper: u16) -> Self {
        let base = base & !1;
        Self {
            next: Mutex::new(base),
            base,
            upper: upper.max(base.saturating_add(2)),
        }
    }

    /// Next free (RTP, RTCP) pair.
    pub fn allocate(&self) -> Result<(u16, u16)> {
        let mut next = self.next.lock();
        let candidates = ((self.upper - self.base) / 2 + 1) as usize;

        for _ in 0..candidates {
            let rtp = *next;
            let rtcp = rtp + 1;
            *next = if u32::from(rtp) + 2 > u32::from(self.upper) {
                self.base
            } else {
                rtp + 2
            };

            if probe(rtp) && probe(rtcp) {
                tracing::debug!(rtp, rtcp, "UDP port pair allocated");
                return Ok((rtp, rtcp));
            }
            tracing::trace!(rtp, rtcp, "UDP port pair busy");
        }

        tracing::warn!(base = self.base, upper = self.upper, "UDP port range exhausted");
        Err(Error::PortRangeExhausted)
    }
}
