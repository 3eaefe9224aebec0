//! Line framer for CouchDB's row-per-line view output.
//!
//! CouchDB writes view and `_all_docs` results as one JSON object, but it puts every
//! row on a line of its own:
//!
//! ```text
//! {"total_rows":3,"offset":0,"rows":[
//! {"id":"a","key":"a","value":1},
//! {"id":"b","key":"b","value":2},
//! {"id":"c","key":"c","value":3}
//! ]}
//! ```
//!
//! [`LineFramer`] relies on that layout to cut rows out of the body without a streaming
//! JSON parser. This is a narrow contract with the server. Output that has been
//! reflowed or pretty-printed is reported as an error rather than recovered from.

use serde_json::value::RawValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// One classified line of the body.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A complete row object.
    Row {
        /// JSON text of the row, with separators and closing brackets removed.
        json: &'a [u8],
        /// Set when no further row follows this one.
        last: bool,
    },
    /// The rows array was closed.
    End,
}

/// Async line framer over a buffered body.
///
/// The framer holds a single line buffer that is reused for every read, so memory use
/// is bounded by the longest row rather than the size of the result.
pub struct LineFramer<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineFramer<R> {
    /// Create a framer positioned at the start of a response body.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }

    /// Read and discard the header line (`{"total_rows":N,"offset":N,"rows":[`).
    ///
    /// Returns `true` when the header already closes the array (`"rows":[]}`), in which
    /// case there are no rows to read.
    pub async fn read_header(&mut self) -> Result<bool> {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
            return Err(Error::UnexpectedEof);
        }
        let terminated = self.line.ends_with(b"\n");
        if trim_terminator(&self.line).ends_with(b"[]}") {
            return Ok(true);
        }
        if !terminated {
            return Err(Error::UnexpectedEof);
        }
        Ok(false)
    }

    /// Read the next line and classify it.
    pub async fn next_frame(&mut self) -> Result<Frame<'_>> {
        self.line.clear();
        self.reader.read_until(b'\n', &mut self.line).await?;
        classify(&self.line)
    }

    /// Discard whatever is left of the body.
    ///
    /// Returns the number of bytes skipped.
    pub async fn drain(&mut self) -> Result<u64> {
        let mut sink = tokio::io::sink();
        let n = tokio::io::copy_buf(&mut self.reader, &mut sink).await?;
        sink.flush().await?;
        Ok(n)
    }
}

/// Classify one raw line, terminator included.
///
/// An empty slice stands for end of input.
pub fn classify(line: &[u8]) -> Result<Frame<'_>> {
    let terminated = line.ends_with(b"\n");
    let body = trim_terminator(line);

    match body {
        b"" if terminated => return Ok(Frame::End),
        b"]}" | b"}]" | b"]" => return Ok(Frame::End),
        _ => {}
    }
    if !terminated {
        // The final line may be a complete last row that closes the array inline.
        return match split_object(body) {
            Some((json, b"]" | b"]}")) => Ok(Frame::Row { json, last: true }),
            _ => Err(Error::UnexpectedEof),
        };
    }
    if !body.starts_with(b"{") {
        return Err(framing(body));
    }

    if let Some(json) = body.strip_suffix(b",") {
        if !json.ends_with(b"}") {
            return Err(framing(body));
        }
        return Ok(Frame::Row { json, last: false });
    }

    // No separator, so this is the last row. The array may be closed on the same line,
    // and a row can itself end in `]}`, so measure the object instead of guessing.
    match split_object(body) {
        Some((json, b"" | b"]" | b"]}")) => Ok(Frame::Row { json, last: true }),
        _ => Err(framing(body)),
    }
}

/// Split a line into its leading JSON object and whatever follows it.
fn split_object(body: &[u8]) -> Option<(&[u8], &[u8])> {
    if !body.starts_with(b"{") {
        return None;
    }
    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<&RawValue>();
    match values.next() {
        Some(Ok(_)) => Some(body.split_at(values.byte_offset())),
        _ => None,
    }
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn framing(line: &[u8]) -> Error {
    Error::Framing {
        line: String::from_utf8_lossy(line).into_owned(),
    }
}
