//! RTMP simple handshake (no HMAC digest).
//!
//! ```text
//! Client                          Server
//!   |---- C0 (version 3) ---------->|
//!   |---- C1 (time, zero, random) ->|
//!   |<--- S0 -----------------------|
//!   |<--- S1 -----------------------|
//!   |<--- S2 (echo of C1) ----------|
//!   |---- C2 (echo of S1) --------->|
//! ```

use std::io::{Read, Write};

use rand::Rng;

use crate::error::{Error, Result};

pub const RTMP_VERSION: u8 = 3;
pub const HANDSHAKE_SIZE: usize = 1536;

fn generate_packet(time: u32) -> Box<[u8; HANDSHAKE_SIZE]> {
    let mut packet = Box::new([0u8; HANDSHAKE_SIZE]);
    packet[0..4].copy_from_slice(&time.to_be_bytes());
    rand::rng().fill(&mut packet[8..]);
    packet
}

fn read_version<S: Read>(stream: &mut S) -> Result<()> {
    let mut version = [0u8; 1];
    stream.read_exact(&mut version)?;
    if version[0] != RTMP_VERSION {
        return Err(Error::Handshake(format!(
            "unsupported RTMP version {}",
            version[0]
        )));
    }
    Ok(())
}

/// Run the client side on a connected stream.
pub fn client_handshake<S: Read + Write>(stream: &mut S) -> Result<()> {
    let c1 = generate_packet(0);
    let mut c0c1 = Vec::with_capacity(1 + HANDSHAKE_SIZE);
    c0c1.push(RTMP_VERSION);
    c0c1.extend_from_slice(&c1[..]);
    stream.write_all(&c0c1)?;
    stream.flush()?;

    read_version(stream)?;
    let mut s1 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s1)?;
    let mut s2 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s2)?;
    if s2[8..] != c1[8..] {
        // Some servers send their own random data in S2; accept it.
        tracing::debug!("S2 does not echo C1");
    }

    stream.write_all(&s1)?;
    stream.flush()?;
    Ok(())
}

/// Run the server side on an accepted stream. Used by loopback endpoints.
pub fn server_handshake<S: Read + Write>(stream: &mut S) -> Result<()> {
    read_version(stream)?;
    let mut c1 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c1)?;

    let s1 = generate_packet(0);
    let mut reply = Vec::with_capacity(1 + 2 * HANDSHAKE_SIZE);
    reply.push(RTMP_VERSION);
    reply.extend_from_slice(&s1[..]);
    reply.extend_from_slice(&c1);
    stream.write_all(&reply)?;
    stream.flush()?;

    let mut c2 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c2)?;
    if c2[8..] != s1[8..] {
        return Err(Error::Handshake("C2 does not echo S1".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use super::*;

    #[test]
    fn client_and_server_complete() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            server_handshake(&mut stream)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client_handshake(&mut client).unwrap();
        server.join().unwrap().unwrap();
    }

    #[test]
    fn rejects_wrong_version() {
        let mut input: &[u8] = &[6u8; 1 + 2 * HANDSHAKE_SIZE];
        let mut sink = Vec::new();
        let mut stream = ReadWrite {
            input: &mut input,
            output: &mut sink,
        };
        assert!(matches!(
            client_handshake(&mut stream),
            Err(Error::Handshake(_))
        ));
        assert_eq!(sink.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(sink[0], RTMP_VERSION);
    }

    struct ReadWrite<'a, 'b> {
        input: &'a mut &'b [u8],
        output: &'a mut Vec<u8>,
    }

    impl Read for ReadWrite<'_, '_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ReadWrite<'_, '_> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
