//! Pull-based row scanner over a streaming view response.
//!
//! A [`RowScanner`] owns the response body and reads it on a background task. Decoded
//! rows are handed over one at a time through a channel of capacity one. The reader
//! reserves the slot before it reads the next line, so it is never more than one row
//! ahead of the caller no matter how large the result is.

use std::sync::{Arc, Mutex, PoisonError};

use futures::TryStreamExt;
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::parser::{Frame, LineFramer};
use crate::types::Row;

/// Write-once slot for the error that ended a scan.
type ErrorSlot = Arc<Mutex<Option<Arc<Error>>>>;

/// Streaming scanner over the rows of a view or `_all_docs` response.
///
/// # Example
///
/// ```ignore
/// let mut rows = db.view_scanner("_design/people", "by_name", &Options::new()).await?;
/// while rows.scan().await {
///     let row = rows.row().expect("scan returned true");
///     let person: Person = row.doc()?;
///     println!("{} => {:?}", row.key, person);
/// }
/// if let Some(err) = rows.close() {
///     eprintln!("scan failed: {}", err);
/// }
/// ```
///
/// Rows arrive in the order the server wrote them. The body is drained and released
/// when the stream is exhausted, when it fails, or when the scanner is closed.
pub struct RowScanner {
    rows: mpsc::Receiver<Row>,
    row: Option<Row>,
    cancel: CancellationToken,
    err: ErrorSlot,
    done: bool,
}

impl RowScanner {
    /// Start scanning a response body.
    ///
    /// The body must be positioned at the start of a successful (200) view response.
    /// The reader task starts immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new<R>(body: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rows) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let err = ErrorSlot::default();

        let framer = LineFramer::new(BufReader::new(body));
        tokio::spawn(run(framer, tx, cancel.clone(), err.clone()));

        Self {
            rows,
            row: None,
            cancel,
            err,
            done: false,
        }
    }

    /// Start scanning the body of a reqwest response.
    ///
    /// The caller is responsible for having checked the status code.
    pub fn from_response(response: reqwest::Response) -> Self {
        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        Self::new(body)
    }

    /// Wait for the next row.
    ///
    /// Returns `true` when a row is available through [`RowScanner::row`], and `false`
    /// once the stream is exhausted, has failed, or the scanner was closed. After the
    /// first `false` every further call returns `false`.
    pub async fn scan(&mut self) -> bool {
        if self.done {
            return false;
        }
        let next = self.rows.recv().await;
        self.done = next.is_none();
        self.row = next;
        !self.done
    }

    /// The row delivered by the last successful [`RowScanner::scan`].
    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    /// The error that ended the scan, if it ended abnormally.
    ///
    /// Exhaustion and cancellation are not errors.
    pub fn err(&self) -> Option<Arc<Error>> {
        self.err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the scan.
    ///
    /// The reader abandons the body at its next read or handoff, then drains and drops
    /// it in the background. Returns the error observed so far. Closing an already
    /// finished or closed scanner only returns that error.
    pub fn close(&mut self) -> Option<Arc<Error>> {
        self.cancel.cancel();
        self.done = true;
        self.row = None;
        self.rows.close();
        self.err()
    }
}

impl Drop for RowScanner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reader task: frame rows, hand them over, then drain and drop the body.
async fn run<R>(
    mut framer: LineFramer<BufReader<R>>,
    tx: mpsc::Sender<Row>,
    cancel: CancellationToken,
    err: ErrorSlot,
) where
    R: AsyncRead + Unpin,
{
    log::debug!("row scanner started");
    match read_rows(&mut framer, &tx, &cancel).await {
        Ok(count) if cancel.is_cancelled() => {
            log::debug!("row scanner cancelled after {} rows", count)
        }
        Ok(count) => log::debug!("row scanner exhausted after {} rows", count),
        Err(e) => {
            log::error!("row scan failed: {}", e);
            set_err(&err, e);
        }
    }
    // The consumer sees the end of the stream only after the error slot is final.
    drop(tx);

    match framer.drain().await {
        Ok(0) => {}
        Ok(n) => log::debug!("drained {} trailing bytes", n),
        Err(e) => log::debug!("failed to drain response body: {}", e),
    }
}

/// Returns the number of rows handed over.
async fn read_rows<R>(
    framer: &mut LineFramer<R>,
    tx: &mpsc::Sender<Row>,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut count = 0;

    let closed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(count),
        closed = framer.read_header() => closed?,
    };
    if closed {
        return Ok(count);
    }

    loop {
        // Nothing is read from the body until the consumer has room for the row.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(count),
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                // Consumer went away without closing.
                Err(_) => return Ok(count),
            },
        };
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(count),
            frame = framer.next_frame() => frame?,
        };
        let (json, last) = match frame {
            Frame::End => return Ok(count),
            Frame::Row { json, last } => (json, last),
        };
        let row: Row = serde_json::from_slice(json).map_err(Error::RowDecode)?;
        permit.send(row);
        count += 1;

        if last {
            return Ok(count);
        }
    }
}

/// Record the terminal error. The first one wins.
fn set_err(slot: &Mutex<Option<Arc<Error>>>, err: Error) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(Arc::new(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_err_first_wins() {
        let slot = ErrorSlot::default();
        set_err(&slot, Error::UnexpectedEof);
        set_err(&slot, Error::MissingField("doc"));
        let err = slot.lock().unwrap().clone().unwrap();
        assert!(matches!(*err, Error::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_close_is_repeatable() {
        let body: &'static [u8] = b"{\"total_rows\":1,\"offset\":0,\"rows\":[\n{\"id\":\"a\",\"key\":\"a\"}\n]}\n";
        let mut scanner = RowScanner::new(body);
        assert!(scanner.close().is_none());
        assert!(scanner.close().is_none());
        assert!(!scanner.scan().await);
        assert!(scanner.row().is_none());
    }
}
