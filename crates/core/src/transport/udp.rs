use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use super::{RtcpTimer, RtcpWatch, RtpTransport};
use crate::error::Result;
use crate::media::rtp::RtpPacket;

/// UDP pair-socket transport for one media stream.
///
/// RTP and RTCP sockets are bound to the pair handed out by the
/// [`PortAllocator`](super::PortAllocator). The RTP destination is fixed at
/// `SETUP` from the client's `client_port` pair. The RTCP socket belongs to
/// the [`RtcpWatch`] and is only read, to keep the countdown alive.
#[derive(Debug)]
pub struct UdpTransport {
    rtp: UdpSocket,
    rtp_dest: SocketAddr,
    server_ports: (u16, u16),
    buf: Vec<u8>,
    watch: RtcpWatch,
}

impl UdpTransport {
    /// Bind the local pair and target the client's ports on `client_ip`.
    pub fn bind(
        server_ports: (u16, u16),
        client_ip: IpAddr,
        client_ports: (u16, u16),
        rtcp_timeout_secs: u32,
    ) -> Result<Self> {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let rtp = UdpSocket::bind(SocketAddr::new(any, server_ports.0))?;
        let rtcp = UdpSocket::bind(SocketAddr::new(any, server_ports.1))?;
        rtcp.set_nonblocking(true)?;

        let rtp_dest = SocketAddr::new(client_ip, client_ports.0);
        tracing::debug!(
            rtp_port = server_ports.0,
            rtcp_port = server_ports.1,
            %rtp_dest,
            "UDP transport bound"
        );

        let timer = Arc::new(RtcpTimer::new(rtcp_timeout_secs));
        Ok(Self {
            rtp,
            rtp_dest,
            server_ports,
            buf: Vec::with_capacity(2048),
            watch: RtcpWatch::with_socket(timer, Arc::new(rtcp)),
        })
    }

    /// Local (RTP, RTCP) ports, echoed in the `Transport` response header.
    pub fn server_ports(&self) -> (u16, u16) {
        self.server_ports
    }

    pub fn destination(&self) -> SocketAddr {
        self.rtp_dest
    }
}

impl RtpTransport for UdpTransport {
    fn send_rtp(&mut self, packet: &RtpPacket<'_>) -> io::Result<()> {
        self.buf.clear();
        packet.write_to(&mut self.buf);
        self.rtp.send_to(&self.buf, self.rtp_dest)?;
        Ok(())
    }

    fn rtcp_watch(&self) -> RtcpWatch {
        self.watch.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpSerializer;
    use crate::transport::PortAllocator;
    use std::time::Duration;

    #[test]
    fn sends_rtp_and_counts_rtcp() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let client_port = client.local_addr().unwrap().port();

        let ports = PortAllocator::new(21000, 22000).allocate().unwrap();
        let mut transport = UdpTransport::bind(
            ports,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            (client_port, client_port + 1),
            2,
        )
        .unwrap();

        let mut serializer = RtpSerializer::new(96, 1, 0);
        let payload = [9u8; 4];
        let mut packet = serializer.start_packet(true, 0);
        packet.push_span(&payload).unwrap();
        transport.send_rtp(&packet).unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(from.port(), ports.0);

        let watch = transport.rtcp_watch();
        assert_eq!(watch.tick(), 1);
        client
            .send_to(&[0x80, 200, 0, 1], ("127.0.0.1", ports.1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(watch.tick(), 1, "RTCP reset then one tick");
        assert_eq!(watch.tick(), 0);
    }
}
