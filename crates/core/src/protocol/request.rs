use crate::error::{Error, ParseErrorKind, Result};

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream1/video`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// `Content-Length` bytes following the header block.
    pub body: Vec<u8>,
}

/// Largest `Content-Length` a request may announce.
pub const MAX_BODY_LEN: usize = 16 * 1024;

fn parse_error(kind: ParseErrorKind) -> Error {
    Error::Parse { kind, cseq: None }
}

impl RtspRequest {
    /// Parse the request line and headers of an RTSP request.
    ///
    /// Expects a complete head: request line, headers, and trailing blank
    /// line. Returns [`Error::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| parse_error(ParseErrorKind::EmptyRequest))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, uri, version] = parts.as_slice() else {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        };
        if !version.starts_with("RTSP/") {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        }
        if *version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| parse_error(ParseErrorKind::InvalidHeader))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: Vec::new(),
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Session identifier without any `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// `CSeq` value of a raw head, found without requiring the rest of it to
/// parse.
fn raw_cseq(head: &[u8]) -> Option<String> {
    String::from_utf8_lossy(head)
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("CSeq"))
        .map(|(_, value)| value.trim().to_string())
}

fn body_len(request: &RtspRequest) -> Result<usize> {
    let Some(value) = request.get_header("Content-Length") else {
        return Ok(0);
    };
    let len = value
        .parse::<usize>()
        .map_err(|_| parse_error(ParseErrorKind::InvalidContentLength))?;
    if len > MAX_BODY_LEN {
        return Err(parse_error(ParseErrorKind::BodyTooLarge));
    }
    Ok(len)
}

/// Take one complete request from the front of `buf`.
///
/// Returns `Ok(None)` while the head or the announced body is incomplete,
/// leaving `buf` untouched. On success the request bytes are drained. A
/// rejected head is drained too and reported as [`Error::Parse`] carrying
/// the head's `CSeq`.
pub fn take_request(buf: &mut Vec<u8>) -> Result<Option<RtspRequest>> {
    let Some(head_len) = find_head_end(buf) else {
        return Ok(None);
    };
    let parsed = std::str::from_utf8(&buf[..head_len])
        .map_err(|_| parse_error(ParseErrorKind::InvalidEncoding))
        .and_then(RtspRequest::parse)
        .and_then(|request| body_len(&request).map(|len| (request, len)));
    let (mut request, body_len) = match parsed {
        Ok(parsed) => parsed,
        Err(Error::Parse { kind, .. }) => {
            let cseq = raw_cseq(&buf[..head_len]);
            buf.drain(..head_len);
            return Err(Error::Parse { kind, cseq });
        }
        Err(e) => {
            buf.drain(..head_len);
            return Err(e);
        }
    };

    let total = head_len + body_len;
    if buf.len() < total {
        return Ok(None);
    }

    request.body = buf[head_len..total].to_vec();
    buf.drain(..total);
    Ok(Some(request))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/stream1 RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/stream1");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/stream1/video RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_empty_and_invalid() {
        assert!(RtspRequest::parse("").is_err());
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
        assert!(RtspRequest::parse("GET / HTTP/1.1\r\n\r\n").is_err());
        assert!(RtspRequest::parse("PLAY * RTSP/1.0\r\nbroken\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\nSession: ABC;timeout=60\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSEQ"), Some("42"));
        assert_eq!(req.session_id(), Some("ABC"));
    }

    #[test]
    fn take_waits_for_complete_head_and_body() {
        let mut buf = b"SET_PARAMETER rtsp://h/stream1 RTSP/1.0\r\nCSeq: 7\r\nContent-Length: 4\r\n\r\nab".to_vec();
        assert!(take_request(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"cdOPTIONS");
        let req = take_request(&mut buf).unwrap().unwrap();
        assert_eq!(req.body, b"abcd");
        assert_eq!(buf, b"OPTIONS");
        assert!(take_request(&mut buf).unwrap().is_none());
    }

    #[test]
    fn take_drops_malformed_head() {
        let mut buf = b"garbage\r\n\r\nOPTIONS * RTSP/1.0\r\nCSeq: 2\r\n\r\n".to_vec();
        assert!(take_request(&mut buf).is_err());
        let req = take_request(&mut buf).unwrap().unwrap();
        assert_eq!(req.cseq(), Some("2"));
    }

    #[test]
    fn rejected_head_reports_its_cseq() {
        let mut buf = b"DESCRIBE rtsp://h/stream1 RTSP/1.0\r\nCSeq: 9\r\nno colon here\r\n\r\n".to_vec();
        match take_request(&mut buf) {
            Err(Error::Parse { kind, cseq }) => {
                assert_eq!(kind, ParseErrorKind::InvalidHeader);
                assert_eq!(cseq.as_deref(), Some("9"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn huge_content_length_is_rejected() {
        let mut buf = format!(
            "SET_PARAMETER rtsp://h/stream1 RTSP/1.0\r\nCSeq: 4\r\nContent-Length: {}\r\n\r\nab",
            usize::MAX
        )
        .into_bytes();
        match take_request(&mut buf) {
            Err(Error::Parse { kind, cseq }) => {
                assert_eq!(kind, ParseErrorKind::BodyTooLarge);
                assert_eq!(cseq.as_deref(), Some("4"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(buf, b"ab");

        let mut buf =
            b"SET_PARAMETER rtsp://h/stream1 RTSP/1.0\r\nContent-Length: 99999999999999999999999\r\n\r\n"
                .to_vec();
        assert!(matches!(
            take_request(&mut buf),
            Err(Error::Parse {
                kind: ParseErrorKind::InvalidContentLength,
                cseq: None
            })
        ));
    }
}
