//! RTSP signaling (RFC 2326): request framing and parsing, response
//! building, `/streamN` URI mapping and SDP generation.
//!
//! Requests arrive on the control connection in HTTP/1.1 syntax:
//!
//! ```text
//! SETUP rtsp://camera/stream1/video RTSP/1.0\r\n
//! CSeq: 3\r\n
//! Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n
//! \r\n
//! ```
//!
//! The session answers OPTIONS, DESCRIBE, SETUP, PLAY and TEARDOWN.
//! GET_PARAMETER and SET_PARAMETER refresh the session timer and carry no
//! payload. Anything else gets 405 with an `Allow` header.

pub mod request;
pub mod response;
pub mod sdp;
pub mod uri;

pub use request::{RtspRequest, take_request};
pub use response::RtspResponse;
