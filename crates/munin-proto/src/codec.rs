//! Length-bounded CRLF line framing.
//!
//! Splits a byte stream into UTF-8 lines. A line ends at `\n`; a preceding
//! `\r` is stripped. Oversize lines are dropped silently (debug-logged),
//! never failing the stream, and invalid UTF-8 is replaced.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Line ceiling for client connections.
pub const CLIENT_LINE_MAX: usize = 4096;
/// Line ceiling for server-to-server links.
pub const SERVER_LINE_MAX: usize = 8192;

/// CRLF line codec with a maximum line length.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_len: usize,
}

impl LineCodec {
    /// Create a codec with the given ceiling.
    pub fn new(max_len: usize) -> LineCodec {
        LineCodec { max_len }
    }

    /// Codec sized for client connections.
    pub fn client() -> LineCodec {
        LineCodec::new(CLIENT_LINE_MAX)
    }

    /// Codec sized for S2S links.
    pub fn server() -> LineCodec {
        LineCodec::new(SERVER_LINE_MAX)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, std::io::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                // Unterminated oversize input: discard eagerly so a hostile
                // peer cannot grow the buffer without ever sending a newline.
                if src.len() > self.max_len {
                    tracing::debug!(len = src.len(), max = self.max_len, "dropping oversize partial line");
                    src.clear();
                }
                return Ok(None);
            };

            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_len {
                tracing::debug!(len = line.len(), max = self.max_len, "dropping oversize line");
                continue;
            }

            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), std::io::Error> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(codec: &mut LineCodec, bytes: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Ok(Some(line)) = codec.decode(&mut buf) {
            out.push(line);
        }
        out
    }

    #[test]
    fn splits_crlf_lines() {
        let mut codec = LineCodec::new(64);
        let lines = feed(&mut codec, b"NICK alice\r\nUSER alice 0 * :A\r\n");
        assert_eq!(lines, vec!["NICK alice", "USER alice 0 * :A"]);
    }

    #[test]
    fn accepts_bare_lf() {
        let mut codec = LineCodec::new(64);
        assert_eq!(feed(&mut codec, b"PING :tok\n"), vec!["PING :tok"]);
    }

    #[test]
    fn skips_empty_lines() {
        let mut codec = LineCodec::new(64);
        assert_eq!(feed(&mut codec, b"\r\n\r\nPING a\r\n"), vec!["PING a"]);
    }

    #[test]
    fn drops_oversize_line_keeps_stream() {
        let mut codec = LineCodec::new(8);
        let mut input = Vec::new();
        input.extend_from_slice(b"AAAAAAAAAAAAAAAA\r\n");
        input.extend_from_slice(b"PING a\r\n");
        assert_eq!(feed(&mut codec, &input), vec!["PING a"]);
    }

    #[test]
    fn replaces_invalid_utf8() {
        let mut codec = LineCodec::new(64);
        let lines = feed(&mut codec, b"PRIVMSG #c :\xff\xfe\r\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains('\u{FFFD}'));
    }

    #[test]
    fn holds_partial_lines() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"PING to"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"k\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PING tok".to_string()));
    }

    #[test]
    fn encodes_with_crlf() {
        let mut codec = LineCodec::client();
        let mut buf = BytesMut::new();
        codec.encode("PONG tok".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG tok\r\n");
    }
}
