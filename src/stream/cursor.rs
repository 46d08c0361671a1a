use crate::api::PagingInformation;
use crate::error::StoreError;
use crate::stream::framer::JsonFramer;
use crate::transport::BodyStream;
use serde_json::Value;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Uninitialized,
    InArray,
    Drained,
    Faulted,
}

/// Forward-only cursor over a streamed result body shaped as
/// `{"Results": [...], <trailer>}`. The caller owns it exclusively and
/// should drop (or `close`) it to release the transport; abandoning it
/// mid-stream is fine.
///
/// The `'p` borrow ties an optional caller-supplied paging state to the
/// cursor; the continuation token from the stream trailer is recorded there.
pub struct StreamCursor<'p> {
    framer: JsonFramer,
    phase: Phase,
    current: Option<Value>,
    expect_separator: bool,
    start: i64,
    page_size: i64,
    paging: Option<&'p mut PagingInformation>,
}

impl<'p> StreamCursor<'p> {
    pub(crate) fn new(
        body: Box<dyn BodyStream>,
        start: i64,
        page_size: i64,
        paging: Option<&'p mut PagingInformation>,
    ) -> StreamCursor<'p> {
        StreamCursor {
            framer: JsonFramer::new(body),
            phase: Phase::Uninitialized,
            current: None,
            expect_separator: false,
            start,
            page_size,
            paging,
        }
    }

    /// Attaches caller-owned paging state after the fact. Opening a stream
    /// may go through failover retries that cannot hold a mutable borrow, so
    /// the cursor is built without one and the borrow is attached once the
    /// stream is actually open.
    pub(crate) fn with_paging<'q>(
        self,
        paging: Option<&'q mut PagingInformation>,
    ) -> StreamCursor<'q> {
        StreamCursor {
            framer: self.framer,
            phase: self.phase,
            current: self.current,
            expect_separator: self.expect_separator,
            start: self.start,
            page_size: self.page_size,
            paging,
        }
    }

    /// Moves to the next item. `Ok(false)` means the stream is exhausted,
    /// and stays `Ok(false)` on every later call rather than erroring.
    pub async fn advance(&mut self) -> Result<bool, StoreError> {
        match self.phase {
            Phase::Drained => return Ok(false),
            Phase::Faulted => {
                return Err(StoreError::Protocol(
                    "stream cursor previously faulted".to_string(),
                ))
            }
            Phase::Uninitialized | Phase::InArray => {}
        }

        match self.step().await {
            Ok(more) => Ok(more),
            Err(e) => {
                self.phase = Phase::Faulted;
                self.current = None;
                Err(e)
            }
        }
    }

    /// The item the last successful `advance` stopped on.
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    /// Releases the transport and parser state. Dropping the cursor does the
    /// same; this just makes the intent explicit at call sites.
    pub fn close(self) {}

    async fn step(&mut self) -> Result<bool, StoreError> {
        if self.phase == Phase::Uninitialized {
            self.read_header().await?;
            self.phase = Phase::InArray;
        }

        match self.framer.peek().await? {
            Some(b']') => {
                self.framer.bump();
                self.read_trailer().await?;
                self.phase = Phase::Drained;
                self.current = None;
                return Ok(false);
            }
            Some(b',') if self.expect_separator => {
                self.framer.bump();
            }
            Some(b',') => {
                return Err(StoreError::Protocol(
                    "unexpected ',' before first result".to_string(),
                ));
            }
            Some(other) if self.expect_separator => {
                return Err(StoreError::Protocol(format!(
                    "expected ',' or ']' in results array, found '{}'",
                    other as char
                )));
            }
            Some(_) => {}
            None => {
                return Err(StoreError::Protocol("unexpected end of data".to_string()));
            }
        }

        let item = self.framer.next_value("results array").await?;
        self.current = Some(item);
        self.expect_separator = true;
        Ok(true)
    }

    async fn read_header(&mut self) -> Result<(), StoreError> {
        self.framer
            .expect_byte(b'{', "unexpected data at start of stream")
            .await?;
        let name = self
            .framer
            .next_value("unexpected data at stream 'Results' property name")
            .await?;
        if name.as_str() != Some("Results") {
            return Err(StoreError::Protocol(
                "unexpected data at stream 'Results' property name".to_string(),
            ));
        }
        self.framer
            .expect_byte(b':', "unexpected data at stream 'Results' property name")
            .await?;
        self.framer
            .expect_byte(b'[', "unexpected data at 'Results', could not find start results array")
            .await?;
        Ok(())
    }

    /// After the results array: at most one trailer property, then the end
    /// of the response object, then nothing.
    async fn read_trailer(&mut self) -> Result<(), StoreError> {
        match self.framer.peek().await? {
            Some(b'}') => {
                self.framer.bump();
            }
            Some(b',') => {
                self.framer.bump();
                let name = self.framer.next_value("stream trailer").await?;
                let name = name.as_str().map(str::to_string).ok_or_else(|| {
                    StoreError::Protocol("expected property name in stream trailer".to_string())
                })?;
                self.framer.expect_byte(b':', "stream trailer").await?;
                match name.as_str() {
                    "NextPageStart" => {
                        let value = self.framer.next_value("NextPageStart trailer").await?;
                        let next_page_start = value.as_i64().ok_or_else(|| {
                            StoreError::Protocol("unexpected end of data".to_string())
                        })?;
                        if let Some(paging) = self.paging.as_mut() {
                            paging.fill(self.start, self.page_size, next_page_start);
                        }
                    }
                    "Error" => {
                        let value = self.framer.next_value("Error trailer").await?;
                        let message = value.as_str().unwrap_or_default().to_string();
                        return Err(StoreError::ServerStream(message));
                    }
                    other => {
                        return Err(StoreError::Protocol(format!(
                            "unexpected property name: {}",
                            other
                        )));
                    }
                }
                self.framer
                    .expect_byte(b'}', "unexpected token type at the end of the response")
                    .await?;
            }
            _ => {
                return Err(StoreError::Protocol(
                    "unexpected token type at the end of the response".to_string(),
                ));
            }
        }

        self.framer.expect_end_of_body().await
    }
}
