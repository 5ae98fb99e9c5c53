//! Asynchronous call pipeline.
//!
//! One call runs as one task through a fixed sequence of states:
//!
//! ```text
//! Idle → AcquiringRequestStream → WritingBody → AwaitingResponse
//!      → ReadingResponseBody → Decoded
//! ```
//!
//! Any error moves the call to `Faulted` and is handed to whoever waits on
//! the [`CallHandle`]. The pipeline never retries and has no cancellation;
//! a caller that loses interest drops the handle and the task runs to its
//! end regardless.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::io::{BufRead, Cursor, Write};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

/// Bytes requested from the response body per read.
pub const READ_WINDOW: usize = 4096;

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOCATION: usize = 1 << 20;

// ── States ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AcquiringRequestStream,
    WritingBody,
    AwaitingResponse,
    ReadingResponseBody,
    Decoded,
    Faulted,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Decoded | CallState::Faulted)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Transport seam ─────────────────────────────────────────────────────────

/// Status line, length and body of a response.
pub struct ResponseStream {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn AsyncRead + Unpin + Send>,
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Writable request body that can then be exchanged for the response.
#[async_trait]
pub trait RequestStream: AsyncWrite + Unpin + Send {
    /// Called once the body has been written and the stream shut down.
    async fn get_response(&mut self) -> Result<ResponseStream>;
}

/// Opens request streams to a URI.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_request_stream(&self, uri: &str) -> Result<Box<dyn RequestStream>>;
}

// ── Pipeline ───────────────────────────────────────────────────────────────

/// Drives a single call. Owns the request stream, the response stream and
/// the response buffer for the duration of the call.
pub struct CallPipeline {
    transport: Arc<dyn Transport>,
    uri: String,
    state: watch::Sender<CallState>,
}

impl CallPipeline {
    pub fn new(transport: Arc<dyn Transport>, uri: impl Into<String>) -> Self {
        let (state, _) = watch::channel(CallState::Idle);
        CallPipeline {
            transport,
            uri: uri.into(),
            state,
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    fn transition(&self, next: CallState) {
        let previous = self.state.send_replace(next);
        debug!(uri = %self.uri, from = %previous, to = %next, "call state");
    }

    /// Run the call: `writer` produces the request body, `reader` decodes
    /// the buffered response body.
    pub async fn run<T, W, R>(&self, writer: W, reader: R) -> Result<T>
    where
        W: FnOnce(&mut dyn Write) -> Result<()>,
        R: FnOnce(&mut dyn BufRead) -> Result<T>,
    {
        match self.drive(writer, reader).await {
            Ok(value) => {
                self.transition(CallState::Decoded);
                Ok(value)
            }
            Err(err) => {
                warn!(uri = %self.uri, state = %self.state(), error = %err, "call faulted");
                self.transition(CallState::Faulted);
                Err(err)
            }
        }
    }

    async fn drive<T, W, R>(&self, writer: W, reader: R) -> Result<T>
    where
        W: FnOnce(&mut dyn Write) -> Result<()>,
        R: FnOnce(&mut dyn BufRead) -> Result<T>,
    {
        self.transition(CallState::AcquiringRequestStream);
        let mut stream = self.transport.open_request_stream(&self.uri).await?;

        self.transition(CallState::WritingBody);
        let mut body = Vec::new();
        writer(&mut body)?;
        stream.write_all(&body).await?;
        stream.flush().await?;
        stream.shutdown().await?;

        self.transition(CallState::AwaitingResponse);
        let response = stream.get_response().await?;
        drop(stream);
        if !(200..300).contains(&response.status) {
            return Err(Error::HttpStatus(response.status));
        }

        self.transition(CallState::ReadingResponseBody);
        let buf = read_body(response).await?;
        let mut cursor = Cursor::new(buf);
        reader(&mut cursor)
    }
}

/// Read the body in [`READ_WINDOW`] chunks until the advertised length is
/// reached or the stream ends.
async fn read_body(mut response: ResponseStream) -> Result<Vec<u8>> {
    let capacity = response.content_length.map_or(READ_WINDOW, |len| {
        usize::try_from(len).unwrap_or(usize::MAX).min(MAX_PREALLOCATION)
    });
    let mut buf = Vec::with_capacity(capacity);
    let mut window = [0u8; READ_WINDOW];
    loop {
        let want = match response.content_length {
            Some(len) => {
                let remaining = len.saturating_sub(buf.len() as u64);
                if remaining == 0 {
                    break;
                }
                usize::try_from(remaining).map_or(READ_WINDOW, |r| r.min(READ_WINDOW))
            }
            None => READ_WINDOW,
        };
        let n = response.body.read(&mut window[..want]).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&window[..n]);
        trace!(read = n, total = buf.len(), "response chunk");
    }
    Ok(buf)
}

// ── Handles ────────────────────────────────────────────────────────────────

/// A call running on its own task.
pub struct CallHandle<T> {
    state: watch::Receiver<CallState>,
    result: oneshot::Receiver<Result<T>>,
}

impl<T> CallHandle<T> {
    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change of the call.
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    /// Wait for the call to finish.
    pub async fn end(self) -> Result<T> {
        self.result.await.unwrap_or_else(|_| Err(task_lost()))
    }

    /// Block the current thread until the call finishes. Must not be called
    /// from inside an async context.
    pub fn wait_blocking(self) -> Result<T> {
        self.result.blocking_recv().unwrap_or_else(|_| Err(task_lost()))
    }
}

fn task_lost() -> Error {
    Error::Transport("call task ended without a result".into())
}

/// Start a call on a new task. Must be called from within a tokio runtime.
pub fn begin_call<T, W, R>(
    transport: Arc<dyn Transport>,
    uri: impl Into<String>,
    writer: W,
    reader: R,
) -> CallHandle<T>
where
    T: Send + 'static,
    W: FnOnce(&mut dyn Write) -> Result<()> + Send + 'static,
    R: FnOnce(&mut dyn BufRead) -> Result<T> + Send + 'static,
{
    let pipeline = CallPipeline::new(transport, uri);
    let state = pipeline.subscribe();
    let (tx, result) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = pipeline.run(writer, reader).await;
        // the caller may have dropped its handle
        let _ = tx.send(outcome);
    });
    CallHandle { state, result }
}

/// Wait for a call started with [`begin_call`].
pub async fn end_call<T>(handle: CallHandle<T>) -> Result<T> {
    handle.end().await
}
