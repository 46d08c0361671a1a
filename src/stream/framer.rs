use crate::error::StoreError;
use crate::transport::BodyStream;
use serde_json::Value;

/// Incremental JSON scanner over a chunked transport body. Keeps the
/// unconsumed tail of the body buffered and pulls the next chunk whenever
/// the buffered bytes end mid-value, so one item is materialized at a time
/// no matter how the server framed its chunks.
pub(crate) struct JsonFramer {
    body: Box<dyn BodyStream>,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl JsonFramer {
    pub(crate) fn new(body: Box<dyn BodyStream>) -> Self {
        JsonFramer {
            body,
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    async fn fill(&mut self) -> Result<bool, StoreError> {
        if self.eof {
            return Ok(false);
        }
        match self.body.next_chunk().await? {
            Some(chunk) => {
                if self.pos > 0 {
                    self.buf.drain(..self.pos);
                    self.pos = 0;
                }
                self.buf.extend_from_slice(&chunk);
                Ok(true)
            }
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    /// Next significant byte without consuming it; `None` only at the true
    /// end of the body.
    pub(crate) async fn peek(&mut self) -> Result<Option<u8>, StoreError> {
        loop {
            while self.pos < self.buf.len() {
                let byte = self.buf[self.pos];
                if byte.is_ascii_whitespace() {
                    self.pos += 1;
                } else {
                    return Ok(Some(byte));
                }
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Consumes the byte `peek` just returned. Only valid right after a
    /// `peek` that returned `Some`.
    pub(crate) fn bump(&mut self) {
        self.pos += 1;
    }

    pub(crate) async fn expect_byte(&mut self, expected: u8, context: &str) -> Result<(), StoreError> {
        match self.peek().await? {
            Some(byte) if byte == expected => {
                self.bump();
                Ok(())
            }
            Some(byte) => Err(StoreError::Protocol(format!(
                "{}: expected '{}', found '{}'",
                context, expected as char, byte as char
            ))),
            None => Err(StoreError::Protocol(format!(
                "{}: unexpected end of data",
                context
            ))),
        }
    }

    /// Parses the next complete JSON value, pulling more chunks as needed.
    pub(crate) async fn next_value(&mut self, context: &str) -> Result<Value, StoreError> {
        loop {
            let (next, offset) = {
                let mut iter =
                    serde_json::Deserializer::from_slice(&self.buf[self.pos..]).into_iter::<Value>();
                let next = iter.next();
                (next, iter.byte_offset())
            };

            match next {
                Some(Ok(value)) => {
                    // A bare number flush with the end of the buffer may have
                    // more digits in the next chunk; only a delimiter proves
                    // it is complete.
                    if value.is_number() && self.pos + offset == self.buf.len() && !self.eof {
                        if self.fill().await? {
                            continue;
                        }
                    }
                    self.pos += offset;
                    return Ok(value);
                }
                Some(Err(e)) if e.is_eof() && !self.eof => {
                    if !self.fill().await? {
                        return Err(StoreError::Protocol(format!(
                            "{}: unexpected end of data",
                            context
                        )));
                    }
                }
                Some(Err(e)) => {
                    return Err(StoreError::Protocol(format!("{}: {}", context, e)));
                }
                None => {
                    if !self.fill().await? {
                        return Err(StoreError::Protocol(format!(
                            "{}: unexpected end of data",
                            context
                        )));
                    }
                }
            }
        }
    }

    /// Confirms the server sent nothing after the response object; trailing
    /// content means the server failed mid-response.
    pub(crate) async fn expect_end_of_body(&mut self) -> Result<(), StoreError> {
        match self.peek().await? {
            None => Ok(()),
            Some(_) => {
                let rest = String::from_utf8_lossy(&self.buf[self.pos..])
                    .trim()
                    .to_string();
                Err(StoreError::Protocol(format!(
                    "server error: unexpected content after end of response: {}",
                    rest
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use bytes::Bytes;
    use std::collections::VecDeque;

    pub(crate) struct ChunkedBody {
        chunks: VecDeque<Bytes>,
    }

    impl ChunkedBody {
        pub(crate) fn new(chunks: Vec<&[u8]>) -> Box<dyn BodyStream> {
            Box::new(ChunkedBody {
                chunks: chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
            })
        }
    }

    #[async_trait::async_trait]
    impl BodyStream for ChunkedBody {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
            Ok(self.chunks.pop_front())
        }
    }

    #[tokio::test]
    async fn parses_a_value_split_across_chunks() {
        let mut framer = JsonFramer::new(ChunkedBody::new(vec![b"{\"a\"", b":", b" 12}"]));
        let value = framer.next_value("test").await.unwrap();
        assert_eq!(value, serde_json::json!({"a": 12}));
    }

    #[tokio::test]
    async fn number_split_across_chunks_is_reassembled() {
        let mut framer = JsonFramer::new(ChunkedBody::new(vec![b"42", b"3 "]));
        let value = framer.next_value("test").await.unwrap();
        assert_eq!(value, serde_json::json!(423));
    }

    #[tokio::test]
    async fn peek_skips_whitespace_across_chunks() {
        let mut framer = JsonFramer::new(ChunkedBody::new(vec![b"  \n", b"\t ", b"]"]));
        assert_eq!(framer.peek().await.unwrap(), Some(b']'));
        framer.bump();
        assert_eq!(framer.peek().await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_value_is_a_protocol_error() {
        let mut framer = JsonFramer::new(ChunkedBody::new(vec![b"{\"a\": 1"]));
        assert!(matches!(
            framer.next_value("test").await,
            Err(StoreError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn trailing_content_is_a_protocol_error() {
        let mut framer = JsonFramer::new(ChunkedBody::new(vec![b"1 ", b"garbage"]));
        framer.next_value("test").await.unwrap();
        assert!(matches!(
            framer.expect_end_of_body().await,
            Err(StoreError::Protocol(_))
        ));
    }
}
