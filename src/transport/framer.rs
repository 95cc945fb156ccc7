use std::net::SocketAddr;

use anyhow::bail;
use bytes::{Buf, Bytes, BytesMut};

/// Turns the byte stream of a single connection into discrete messages. A framer is stateful
///  and is fed the raw bytes of every read, however they happen to be chunked.
///
/// An error means the stream cannot be framed any more, and the connection is closed.
pub trait Framer: Send {
    fn feed(&mut self, bytes: &[u8]) -> anyhow::Result<Vec<Bytes>>;
}

pub trait FramerFactory: Send + Sync + 'static {
    fn new_framer(&self, remote_addr: SocketAddr) -> Box<dyn Framer>;
}

impl <F> FramerFactory for F
where F: Fn(SocketAddr) -> Box<dyn Framer> + Send + Sync + 'static
{
    fn new_framer(&self, remote_addr: SocketAddr) -> Box<dyn Framer> {
        self(remote_addr)
    }
}

/// Frames SIP messages on a stream transport (RFC 3261 section 18.3): a message is its start
///  line and headers up to the first empty line, followed by a body of exactly
///  `Content-Length` bytes. A missing `Content-Length` means an empty body.
///
/// CRLF sequences between messages (RFC 5626 keep-alives) are skipped.
pub struct ContentLengthFramer {
    buf: BytesMut,
    max_message_size: usize,
}

impl ContentLengthFramer {
    pub fn new(max_message_size: usize) -> ContentLengthFramer {
        ContentLengthFramer {
            buf: BytesMut::new(),
            max_message_size,
        }
    }

    fn skip_keep_alives(&mut self) {
        let num_crlf_bytes = self.buf.iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        self.buf.advance(num_crlf_bytes);
    }

    fn try_split_message(&mut self) -> anyhow::Result<Option<Bytes>> {
        self.skip_keep_alives();

        let Some(header_end) = find_header_end(&self.buf) else {
            if self.buf.len() > self.max_message_size {
                bail!("no end of headers within {} bytes", self.max_message_size);
            }
            return Ok(None);
        };

        let body_len = content_length(&self.buf[..header_end])?;
        let message_len = match header_end.checked_add(body_len) {
            Some(len) if len <= self.max_message_size => len,
            _ => bail!("message with a body of {} bytes exceeds the maximum of {} bytes", body_len, self.max_message_size),
        };

        if self.buf.len() < message_len {
            return Ok(None);
        }
        Ok(Some(self.buf.split_to(message_len).freeze()))
    }
}

impl Framer for ContentLengthFramer {
    fn feed(&mut self, bytes: &[u8]) -> anyhow::Result<Vec<Bytes>> {
        self.buf.extend_from_slice(bytes);

        let mut result = Vec::new();
        while let Some(message) = self.try_split_message()? {
            result.push(message);
        }
        Ok(result)
    }
}

/// Creates a [ContentLengthFramer] per connection
pub struct ContentLengthFramerFactory {
    pub max_message_size: usize,
}

impl FramerFactory for ContentLengthFramerFactory {
    fn new_framer(&self, _remote_addr: SocketAddr) -> Box<dyn Framer> {
        Box::new(ContentLengthFramer::new(self.max_message_size))
    }
}

/// offset *after* the empty line terminating the header section
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn content_length(headers: &[u8]) -> anyhow::Result<usize> {
    let headers = match std::str::from_utf8(headers) {
        Ok(s) => s,
        Err(_) => bail!("header section is not valid UTF-8"),
    };

    for line in headers.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
            return match value.trim().parse() {
                Ok(len) => Ok(len),
                Err(_) => bail!("invalid Content-Length {:?}", value.trim()),
            };
        }
    }
    Ok(0)
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    const OPTIONS: &[u8] = b"OPTIONS sip:bob@example.com SIP/2.0\r\nCSeq: 1 OPTIONS\r\nContent-Length: 0\r\n\r\n";
    const MESSAGE: &[u8] = b"MESSAGE sip:bob@example.com SIP/2.0\r\nl: 5\r\n\r\nhello";

    #[test]
    fn test_single_message() {
        let mut framer = ContentLengthFramer::new(4096);
        let messages = framer.feed(OPTIONS).unwrap();
        assert_eq!(messages, vec![Bytes::from_static(OPTIONS)]);
    }

    #[test]
    fn test_two_messages_in_one_chunk() {
        let mut framer = ContentLengthFramer::new(4096);
        let mut buf = OPTIONS.to_vec();
        buf.extend_from_slice(MESSAGE);

        let messages = framer.feed(&buf).unwrap();
        assert_eq!(messages, vec![Bytes::from_static(OPTIONS), Bytes::from_static(MESSAGE)]);
    }

    #[rstest]
    #[case::one_byte(1)]
    #[case::three_bytes(3)]
    #[case::seventeen_bytes(17)]
    fn test_arbitrary_chunking(#[case] chunk_size: usize) {
        let mut framer = ContentLengthFramer::new(4096);
        let mut stream = MESSAGE.to_vec();
        stream.extend_from_slice(OPTIONS);
        stream.extend_from_slice(MESSAGE);

        let mut messages = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            messages.extend(framer.feed(chunk).unwrap());
        }
        assert_eq!(messages, vec![Bytes::from_static(MESSAGE), Bytes::from_static(OPTIONS), Bytes::from_static(MESSAGE)]);
    }

    #[test]
    fn test_keep_alives_are_skipped() {
        let mut framer = ContentLengthFramer::new(4096);
        assert!(framer.feed(b"\r\n\r\n").unwrap().is_empty());

        let mut buf = b"\r\n".to_vec();
        buf.extend_from_slice(OPTIONS);
        assert_eq!(framer.feed(&buf).unwrap(), vec![Bytes::from_static(OPTIONS)]);
    }

    #[test]
    fn test_missing_content_length_means_empty_body() {
        let mut framer = ContentLengthFramer::new(4096);
        let msg = b"BYE sip:bob@example.com SIP/2.0\r\nCSeq: 2 BYE\r\n\r\n";
        assert_eq!(framer.feed(msg).unwrap(), vec![Bytes::from_static(msg)]);
    }

    #[test]
    fn test_incomplete_body_is_retained() {
        let mut framer = ContentLengthFramer::new(4096);
        assert!(framer.feed(&MESSAGE[..MESSAGE.len() - 2]).unwrap().is_empty());
        assert_eq!(framer.feed(&MESSAGE[MESSAGE.len() - 2..]).unwrap(), vec![Bytes::from_static(MESSAGE)]);
    }

    #[rstest]
    #[case::invalid_content_length(b"INVITE sip:a@b SIP/2.0\r\nContent-Length: abc\r\n\r\n".as_slice())]
    #[case::too_long_body(b"INVITE sip:a@b SIP/2.0\r\nContent-Length: 100000\r\n\r\n".as_slice())]
    #[case::content_length_overflows(b"INVITE sip:a@b SIP/2.0\r\nContent-Length: 18446744073709551615\r\n\r\n".as_slice())]
    #[case::no_header_end(&[b'x'; 200])]
    fn test_errors(#[case] buf: &[u8]) {
        let mut framer = ContentLengthFramer::new(128);
        assert!(framer.feed(buf).is_err());
    }
}
