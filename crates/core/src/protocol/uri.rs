//! Request-URI helpers.
//!
//! Streams are addressed as `/streamN` with N ≥ 1; the internal channel is
//! N − 1. Tracks hang off the stream URI as `/video` and `/audio`:
//!
//! ```text
//! rtsp://camera:554/stream1          → channel 0
//! rtsp://camera:554/stream2/audio    → channel 1, audio track
//! ```

const STREAM_PREFIX: &str = "stream";

/// Media track selected by a SETUP URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Video,
    Audio,
}

impl Track {
    /// Control suffix used in SDP and SETUP URIs.
    pub fn control(self) -> &'static str {
        match self {
            Track::Video => "video",
            Track::Audio => "audio",
        }
    }
}

/// Path component of an RTSP URI (`/` if none).
pub fn path(uri: &str) -> &str {
    match uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        Some(after) => match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        },
        None if uri.starts_with('/') => uri,
        None => "/",
    }
}

/// Host part of an RTSP URI, without port.
pub fn host(uri: &str) -> Option<&str> {
    let after = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))?;
    let authority = after.split('/').next()?;
    let host = match authority.strip_prefix('[') {
        Some(v6) => v6.split(']').next()?,
        None => authority.split(':').next()?,
    };
    let host = host.trim();
    (!host.is_empty()).then_some(host)
}

/// Zero-based channel from a `/streamN[/...]` URI.
pub fn channel(uri: &str) -> Option<u32> {
    let first = path(uri).trim_start_matches('/').split('/').next()?;
    let n: u32 = first.strip_prefix(STREAM_PREFIX)?.parse().ok()?;
    n.checked_sub(1)
}

/// Track addressed by the last path segment, if any.
pub fn track(uri: &str) -> Option<Track> {
    match path(uri).trim_end_matches('/').rsplit('/').next()? {
        "video" => Some(Track::Video),
        "audio" => Some(Track::Audio),
        _ => None,
    }
}

/// The stream URI without a trailing track segment or slash; used as
/// `Content-Base` and for building `a=control` lines.
pub fn base(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches('/');
    match track(trimmed) {
        Some(t) => trimmed
            .strip_suffix(t.control())
            .map(|s| s.trim_end_matches('/'))
            .unwrap_or(trimmed),
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_forms() {
        assert_eq!(path("rtsp://localhost:8554/stream1"), "/stream1");
        assert_eq!(path("rtsp://localhost:8554"), "/");
        assert_eq!(path("*"), "/");
        assert_eq!(path("/stream2/video"), "/stream2/video");
    }

    #[test]
    fn channel_mapping() {
        assert_eq!(channel("rtsp://10.0.0.1/stream1"), Some(0));
        assert_eq!(channel("rtsp://10.0.0.1:554/stream3/audio"), Some(2));
        assert_eq!(channel("rtsp://10.0.0.1/stream0"), None);
        assert_eq!(channel("rtsp://10.0.0.1/live"), None);
        assert_eq!(channel("rtsp://10.0.0.1/streamX"), None);
        assert_eq!(channel("rtsp://10.0.0.1"), None);
    }

    #[test]
    fn track_and_base() {
        assert_eq!(track("rtsp://h/stream1/video"), Some(Track::Video));
        assert_eq!(track("rtsp://h/stream1/audio/"), Some(Track::Audio));
        assert_eq!(track("rtsp://h/stream1"), None);
        assert_eq!(base("rtsp://h/stream1/audio"), "rtsp://h/stream1");
        assert_eq!(base("rtsp://h/stream1/"), "rtsp://h/stream1");
        assert_eq!(base("rtsp://h/stream1"), "rtsp://h/stream1");
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host("rtsp://192.168.1.10:554/stream1"), Some("192.168.1.10"));
        assert_eq!(host("rtsp://cam/stream1"), Some("cam"));
        assert_eq!(host("rtsp://[::1]:554/stream1"), Some("::1"));
        assert_eq!(host("/stream1"), None);
    }
}
