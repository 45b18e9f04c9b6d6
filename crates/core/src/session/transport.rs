/// Client-side transport request from the RTSP `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Client → Server (UDP):
///   Transport: RTP/AVP;unicast;client_port=8000-8001
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
///
/// Client → Server (TCP interleaved):
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
///
/// The interleave channels the client proposes are ignored: video always
/// uses 0/1 and audio 2/3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportHeader {
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    Interleaved,
}

fn port_pair(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((rtp, rtcp)) => Some((rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?)),
        None => {
            let rtp: u16 = value.trim().parse().ok()?;
            Some((rtp, rtp.checked_add(1)?))
        }
    }
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Only the first transport spec of a comma-separated list is
    /// considered. Multicast and RTP/AVP without `client_port` are rejected.
    ///
    /// ## Examples
    ///
    /// ```
    /// use camstream::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th, TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.split(',').next()?.trim();
        let mut params = spec.split(';').map(str::trim);
        let profile = params.next()?;

        let mut client_ports = None;
        for param in params {
            if param.eq_ignore_ascii_case("multicast") {
                return None;
            }
            if let Some(ports) = param.strip_prefix("client_port=") {
                client_ports = port_pair(ports);
            }
        }

        match profile.to_ascii_uppercase().as_str() {
            "RTP/AVP/TCP" => Some(TransportHeader::Interleaved),
            "RTP/AVP" | "RTP/AVP/UDP" => {
                let (rtp, rtcp) = client_ports?;
                Some(TransportHeader::Udp {
                    client_rtp_port: rtp,
                    client_rtcp_port: rtcp,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_udp_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            th,
            TransportHeader::Udp {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
        let th = TransportHeader::parse("RTP/AVP/UDP;unicast;client_port=6000").unwrap();
        assert_eq!(
            th,
            TransportHeader::Udp {
                client_rtp_port: 6000,
                client_rtcp_port: 6001
            }
        );
    }

    #[test]
    fn parse_tcp_transport() {
        assert_eq!(
            TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=4-5"),
            Some(TransportHeader::Interleaved)
        );
        assert_eq!(
            TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=0-1,RTP/AVP;unicast;client_port=1-2"),
            Some(TransportHeader::Interleaved)
        );
    }

    #[test]
    fn rejects_unusable_transports() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
        assert!(TransportHeader::parse("RTP/AVP;multicast;client_port=1-2").is_none());
        assert!(TransportHeader::parse("RAW/RAW/UDP;unicast;client_port=1-2").is_none());
        assert!(TransportHeader::parse("RTP/AVP;unicast;client_port=x-y").is_none());
    }
}
