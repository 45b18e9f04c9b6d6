//! SDP (Session Description Protocol) generation (RFC 4566).
//!
//! Produces the SDP body returned by DESCRIBE responses:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! c=IN IP4 <addr>                              ← connection address
//! t=0 0                                        ← timing (live stream)
//! a=tool:camstream                             ← server software
//! a=range:npt=0-                               ← open-ended live range
//! a=sendonly                                   ← direction
//! m=video 0 RTP/AVP 96                         ← one section per track
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;...
//! a=control:rtsp://<host>/stream1/video
//! m=audio 0 RTP/AVP 97
//! ...
//! ```

use crate::media::Packetizer;
use crate::protocol::uri::Track;

/// Session-level fields of the description.
#[derive(Debug, Clone, Copy)]
pub struct SdpOrigin<'a> {
    pub username: &'a str,
    pub session_id: &'a str,
    pub session_version: &'a str,
    pub session_name: &'a str,
    pub address: &'a str,
}

/// One `m=` section.
pub struct SdpTrack<'a> {
    pub track: Track,
    pub packetizer: &'a dyn Packetizer,
}

fn addr_type(address: &str) -> &'static str {
    if address.contains(':') { "IP6" } else { "IP4" }
}

/// Generate the session description for a stream.
///
/// `base_uri` is the stream URI; every track gets an absolute
/// `a=control:<base_uri>/<track>` line.
pub fn generate_sdp(origin: &SdpOrigin<'_>, base_uri: &str, tracks: &[SdpTrack<'_>]) -> String {
    let ip = addr_type(origin.address);
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!(
            "o={} {} {} IN {ip} {}",
            origin.username, origin.session_id, origin.session_version, origin.address
        ),
        format!("s={}", origin.session_name),
        format!("c=IN {ip} {}", origin.address),
        "t=0 0".to_string(),
        "a=tool:camstream".to_string(),
        "a=range:npt=0-".to_string(),
        "a=sendonly".to_string(),
    ];

    for t in tracks {
        let media = match t.track {
            Track::Video => "video",
            Track::Audio => "audio",
        };
        sdp.push(format!("m={media} 0 RTP/AVP {}", t.packetizer.payload_type()));
        sdp.extend(t.packetizer.sdp_attributes());
        sdp.push(format!("a=control:{base_uri}/{}", t.track.control()));
    }

    tracing::debug!(sdp = %sdp.join("\\r\\n"), "SDP generated");

    format!("{}\r\n", sdp.join("\r\n"))
}
