use std::fmt::Write;

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = concat!("camstream/", env!("CARGO_PKG_VERSION"));

/// Status codes the server answers with (RFC 2326 §7.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Malformed request, unknown channel or codec.
    BadRequest,
    MethodNotAllowed,
    SessionNotFound,
    MethodNotValidInState,
    UnsupportedTransport,
    /// Local resource failure such as an exhausted port range.
    InternalError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::MethodNotAllowed => 405,
            Status::SessionNotFound => 454,
            Status::MethodNotValidInState => 455,
            Status::UnsupportedTransport => 461,
            Status::InternalError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::SessionNotFound => "Session Not Found",
            Status::MethodNotValidInState => "Method Not Valid in This State",
            Status::UnsupportedTransport => "Unsupported Transport",
            Status::InternalError => "Internal Server Error",
        }
    }
}

/// An RTSP response (RFC 2326 §7).
///
/// The header block always starts with `Server`, followed by `CSeq` once
/// [`for_request`](Self::for_request) has tied the response to a request.
/// `Content-Length` is derived from the body at serialization.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status: Status,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status: Status) -> Self {
        RtspResponse {
            status,
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(Status::Ok)
    }

    pub fn bad_request() -> Self {
        Self::new(Status::BadRequest)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(Status::MethodNotAllowed)
    }

    pub fn session_not_found() -> Self {
        Self::new(Status::SessionNotFound)
    }

    pub fn method_not_valid_in_state() -> Self {
        Self::new(Status::MethodNotValidInState)
    }

    pub fn unsupported_transport() -> Self {
        Self::new(Status::UnsupportedTransport)
    }

    pub fn internal_error() -> Self {
        Self::new(Status::InternalError)
    }

    /// Echo the request's `CSeq` (RFC 2326 §12.17) right after `Server`.
    /// A request that carried none is answered with `CSeq: 0`.
    pub fn for_request(mut self, cseq: Option<&str>) -> Self {
        self.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("CSeq"));
        let at = self.headers.len().min(1);
        self.headers
            .insert(at, ("CSeq".to_string(), cseq.unwrap_or("0").to_string()));
        self
    }

    pub fn cseq(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == "CSeq")
            .map(|(_, value)| value.as_str())
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(128 + self.body.as_ref().map_or(0, String::len));
        let _ = write!(out, "RTSP/1.0 {} {}\r\n", self.status.code(), self.status.reason());
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        if let Some(body) = &self.body {
            let _ = write!(out, "Content-Length: {}\r\n", body.len());
        }
        out.push_str("\r\n");
        if let Some(body) = &self.body {
            out.push_str(body);
        }
        out
    }
}
