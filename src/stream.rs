//! Streaming relay: forward upstream model tokens as framed chunks.
//!
//! [`RelayStream`] is a `Stream<Item = StreamChunk>` driven by an explicit
//! state machine:
//!
//! ```text
//!   Idle ──(upstream opened)──▶ Streaming ──(exhausted)──▶ Terminated  emits Done
//!    │                             │
//!    └──(open fails / timeout)─────┴──(error / timeout)──▶ Terminated  emits Error
//! ```
//!
//! Every upstream token becomes exactly one [`StreamChunk::Data`], in arrival
//! order, with no batching or re-splitting. Exactly one terminal chunk ends
//! every run and the stream yields `None` afterwards.
//!
//! Cancellation is by drop: when the caller goes away the relay is dropped,
//! which drops the upstream stream and releases its connection. Nothing is
//! buffered, so no tokens accumulate for a caller that is gone.

use crate::error::UpstreamError;
use crate::frame::StreamChunk;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Tokens from the upstream model, one item per streamed delta.
pub type TokenStream = BoxStream<'static, Result<String, UpstreamError>>;

/// A pending upstream call that resolves to its token stream.
pub type UpstreamFuture = BoxFuture<'static, Result<TokenStream, UpstreamError>>;

/// Observable phase of a [`RelayStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Idle,
    Streaming,
    Terminated,
}

enum RelayState {
    Idle(UpstreamFuture),
    Streaming(TokenStream),
    Terminated,
}

/// How a relay run ended, as seen by the writer that drove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// All tokens forwarded, `Done` delivered.
    Completed { data_chunks: usize },
    /// Upstream failed, `Error` delivered after `data_chunks` fragments.
    Failed { data_chunks: usize },
    /// The caller disconnected; upstream was dropped.
    Cancelled { data_chunks: usize },
}

/// The relay state machine. See the module docs.
pub struct RelayStream {
    state: RelayState,
    idle_timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
    error_message: String,
    data_chunks: usize,
}

impl RelayStream {
    /// Relay the stream produced by `upstream`.
    ///
    /// `error_message` is the caller-visible text of the terminal error
    /// frame; the underlying [`UpstreamError`] is only logged.
    pub fn new(upstream: UpstreamFuture, error_message: impl Into<String>) -> Self {
        Self {
            state: RelayState::Idle(upstream),
            idle_timeout: None,
            deadline: None,
            error_message: error_message.into(),
            data_chunks: 0,
        }
    }

    /// Relay an already-open token stream.
    pub fn from_tokens(tokens: TokenStream, error_message: impl Into<String>) -> Self {
        Self::new(futures::future::ready(Ok(tokens)).boxed(), error_message)
    }

    /// A relay that emits a single error chunk and nothing else.
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self::new(
            futures::future::ready(Err(UpstreamError::Connect(
                "request rejected before upstream call".into(),
            )))
            .boxed(),
            error_message,
        )
    }

    /// Fail the stream if no token arrives within `timeout`.
    ///
    /// The timer covers opening the upstream call as well as every gap
    /// between tokens.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn phase(&self) -> RelayPhase {
        match self.state {
            RelayState::Idle(_) => RelayPhase::Idle,
            RelayState::Streaming(_) => RelayPhase::Streaming,
            RelayState::Terminated => RelayPhase::Terminated,
        }
    }

    fn terminate_with_error(&mut self, err: UpstreamError) -> StreamChunk {
        warn!(
            "Relay failed after {} data chunks: {}",
            self.data_chunks, err
        );
        self.state = RelayState::Terminated;
        self.deadline = None;
        StreamChunk::Error(self.error_message.clone())
    }

    fn rearm_deadline(&mut self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let at = Instant::now() + timeout;
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.deadline = Some(Box::pin(tokio::time::sleep_until(at))),
        }
    }

    fn poll_deadline(&mut self, cx: &mut Context<'_>) -> Option<StreamChunk> {
        let timeout = self.idle_timeout?;
        if self.deadline.is_none() {
            self.rearm_deadline();
        }
        let sleep = self.deadline.as_mut()?;
        if sleep.as_mut().poll(cx).is_ready() {
            return Some(self.terminate_with_error(UpstreamError::IdleTimeout {
                secs: timeout.as_secs(),
            }));
        }
        None
    }
}

impl Stream for RelayStream {
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamChunk>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                RelayState::Terminated => return Poll::Ready(None),

                RelayState::Idle(open) => match open.poll_unpin(cx) {
                    Poll::Ready(Ok(tokens)) => {
                        debug!("Upstream opened, relay streaming");
                        this.state = RelayState::Streaming(tokens);
                        this.rearm_deadline();
                    }
                    Poll::Ready(Err(e)) => {
                        return Poll::Ready(Some(this.terminate_with_error(e)));
                    }
                    Poll::Pending => {
                        return match this.poll_deadline(cx) {
                            Some(chunk) => Poll::Ready(Some(chunk)),
                            None => Poll::Pending,
                        };
                    }
                },

                RelayState::Streaming(tokens) => match tokens.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(token))) => {
                        this.data_chunks += 1;
                        this.rearm_deadline();
                        return Poll::Ready(Some(StreamChunk::Data(token)));
                    }
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(this.terminate_with_error(e)));
                    }
                    Poll::Ready(None) => {
                        info!("Relay complete: {} data chunks", this.data_chunks);
                        this.state = RelayState::Terminated;
                        this.deadline = None;
                        return Poll::Ready(Some(StreamChunk::Done));
                    }
                    Poll::Pending => {
                        return match this.poll_deadline(cx) {
                            Some(chunk) => Poll::Ready(Some(chunk)),
                            None => Poll::Pending,
                        };
                    }
                },
            }
        }
    }
}

/// Write every chunk of `relay` as a wire frame, flushing after each one.
///
/// A write failure means the caller has gone: the relay (and with it the
/// upstream stream) is dropped immediately and the run is reported as
/// [`RelayOutcome::Cancelled`].
pub async fn write_frames<W>(mut relay: RelayStream, writer: &mut W) -> RelayOutcome
where
    W: AsyncWrite + Unpin,
{
    let mut data_chunks = 0usize;
    while let Some(chunk) = relay.next().await {
        let frame = chunk.encode();
        let written = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            info!("Caller disconnected after {} data chunks: {}", data_chunks, e);
            return RelayOutcome::Cancelled { data_chunks };
        }

        match chunk {
            StreamChunk::Data(_) => data_chunks += 1,
            StreamChunk::Done => return RelayOutcome::Completed { data_chunks },
            StreamChunk::Error(_) => return RelayOutcome::Failed { data_chunks },
        }
    }
    // Unreachable in practice: the relay always yields a terminal chunk.
    RelayOutcome::Failed { data_chunks }
}

/// Forward chunks into a channel until the terminal chunk or until the
/// receiver is dropped.
///
/// Receiver drop is noticed even while upstream is silent, so a departed
/// caller never keeps an upstream connection open.
pub async fn forward_chunks(mut relay: RelayStream, tx: mpsc::Sender<StreamChunk>) -> RelayOutcome {
    let mut data_chunks = 0usize;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = tx.closed() => {
                info!("Receiver dropped after {} data chunks", data_chunks);
                return RelayOutcome::Cancelled { data_chunks };
            }
            chunk = relay.next() => chunk,
        };

        let Some(chunk) = chunk else {
            return RelayOutcome::Failed { data_chunks };
        };
        let outcome = match &chunk {
            StreamChunk::Data(_) => None,
            StreamChunk::Done => Some(RelayOutcome::Completed { data_chunks }),
            StreamChunk::Error(_) => Some(RelayOutcome::Failed { data_chunks }),
        };
        if tx.send(chunk).await.is_err() {
            return RelayOutcome::Cancelled { data_chunks };
        }
        match outcome {
            Some(done) => return done,
            None => data_chunks += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn tokens(items: Vec<Result<&'static str, UpstreamError>>) -> TokenStream {
        stream::iter(items.into_iter().map(|r| r.map(str::to_string))).boxed()
    }

    /// Upstream that counts polls and records when it is dropped.
    struct TrackedTokens {
        remaining: Vec<String>,
        pulled: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl Stream for TrackedTokens {
        type Item = Result<String, UpstreamError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let this = self.get_mut();
            this.pulled.fetch_add(1, Ordering::SeqCst);
            if this.remaining.is_empty() {
                Poll::Ready(None)
            } else {
                Poll::Ready(Some(Ok(this.remaining.remove(0))))
            }
        }
    }

    impl Drop for TrackedTokens {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn n_tokens_then_done() {
        let relay = RelayStream::from_tokens(tokens(vec![Ok("Mer"), Ok("ha"), Ok("ba")]), "x");
        let out: Vec<_> = relay.collect().await;
        assert_eq!(
            out,
            vec![
                StreamChunk::Data("Mer".into()),
                StreamChunk::Data("ha".into()),
                StreamChunk::Data("ba".into()),
                StreamChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_yields_k_data_then_error() {
        let relay = RelayStream::from_tokens(
            tokens(vec![
                Ok("a"),
                Ok("b"),
                Err(UpstreamError::Stream("reset by peer".into())),
                Ok("never"),
            ]),
            "Translation failed!",
        );
        let out: Vec<_> = relay.collect().await;
        assert_eq!(
            out,
            vec![
                StreamChunk::Data("a".into()),
                StreamChunk::Data("b".into()),
                StreamChunk::Error("Translation failed!".into()),
            ]
        );
    }

    #[tokio::test]
    async fn open_failure_yields_single_error() {
        let relay = RelayStream::new(
            futures::future::ready(Err(UpstreamError::Connect("401".into()))).boxed(),
            "Translation failed!",
        );
        let out: Vec<_> = relay.collect().await;
        assert_eq!(out, vec![StreamChunk::Error("Translation failed!".into())]);
    }

    #[tokio::test]
    async fn failed_relay_emits_only_error() {
        let out: Vec<_> = RelayStream::failed("Unsupported file type!").collect().await;
        assert_eq!(out, vec![StreamChunk::Error("Unsupported file type!".into())]);
    }

    #[tokio::test]
    async fn phases_follow_the_state_machine() {
        let (tx, rx) = tokio::sync::oneshot::channel::<Result<TokenStream, UpstreamError>>();
        let open = async move {
            rx.await
                .unwrap_or_else(|_| Err(UpstreamError::Connect("gone".into())))
        };
        let mut relay = task::spawn(RelayStream::new(open.boxed(), "x"));

        assert_pending!(relay.poll_next());
        assert_eq!(relay.phase(), RelayPhase::Idle);

        tx.send(Ok(tokens(vec![Ok("t")]))).ok();
        assert!(relay.is_woken());
        assert_ready_eq!(relay.poll_next(), Some(StreamChunk::Data("t".into())));
        assert_eq!(relay.phase(), RelayPhase::Streaming);
        assert_ready_eq!(relay.poll_next(), Some(StreamChunk::Done));
        assert_eq!(relay.phase(), RelayPhase::Terminated);
        assert_ready_eq!(relay.poll_next(), None);
        assert_ready_eq!(relay.poll_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_upstream_times_out() {
        let silent: TokenStream = stream::pending().boxed();
        let relay = RelayStream::from_tokens(silent, "Translation failed!")
            .with_idle_timeout(Some(Duration::from_secs(5)));
        let out: Vec<_> = relay.collect().await;
        assert_eq!(out, vec![StreamChunk::Error("Translation failed!".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_rearmed_by_each_token() {
        let slow = stream::iter(["a", "b"])
            .then(|t| async move {
                tokio::time::sleep(Duration::from_secs(4)).await;
                Ok::<_, UpstreamError>(t.to_string())
            })
            .boxed();
        let relay =
            RelayStream::from_tokens(slow, "x").with_idle_timeout(Some(Duration::from_secs(5)));
        let out: Vec<_> = relay.collect().await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], StreamChunk::Done);
    }

    #[tokio::test]
    async fn dropping_after_k_chunks_stops_upstream() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let tracked = TrackedTokens {
            remaining: (0..10).map(|i| i.to_string()).collect(),
            pulled: Arc::clone(&pulled),
            dropped: Arc::clone(&dropped),
        };
        let mut relay = RelayStream::from_tokens(tracked.boxed(), "x");

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(relay.next().await.unwrap());
        }
        drop(relay);

        assert_eq!(received.len(), 3);
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
        assert!(dropped.load(Ordering::SeqCst));
    }

    /// Writer that accepts `limit` writes and then reports a broken pipe.
    struct Hangup {
        frames: Vec<u8>,
        writes_left: usize,
    }

    impl AsyncWrite for Hangup {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let this = self.get_mut();
            if this.writes_left == 0 {
                return Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
            }
            this.writes_left -= 1;
            this.frames.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writer_disconnect_cancels_and_drops_upstream() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let tracked = TrackedTokens {
            remaining: (0..10).map(|i| format!("t{i}")).collect(),
            pulled: Arc::clone(&pulled),
            dropped: Arc::clone(&dropped),
        };
        let mut writer = Hangup {
            frames: Vec::new(),
            writes_left: 2,
        };

        let relay = RelayStream::from_tokens(tracked.boxed(), "x");
        let outcome = write_frames(relay, &mut writer).await;

        assert_eq!(outcome, RelayOutcome::Cancelled { data_chunks: 2 });
        assert_eq!(writer.frames, b"data: t0\n\ndata: t1\n\n");
        assert!(pulled.load(Ordering::SeqCst) <= 3);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn write_frames_reports_completion() {
        let mut out = Vec::new();
        let outcome = write_frames(
            RelayStream::from_tokens(tokens(vec![Ok("x"), Ok("y")]), "e"),
            &mut out,
        )
        .await;
        assert_eq!(outcome, RelayOutcome::Completed { data_chunks: 2 });
        assert_eq!(out, b"data: x\n\ndata: y\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn forward_stops_when_receiver_is_dropped() {
        let dropped = Arc::new(AtomicBool::new(false));
        let tracked = TrackedTokens {
            remaining: vec!["only".into()],
            pulled: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::clone(&dropped),
        };
        // Upstream stalls forever after its single token.
        let upstream = tracked.chain(stream::pending()).boxed();
        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(forward_chunks(RelayStream::from_tokens(upstream, "x"), tx));

        assert_eq!(rx.recv().await, Some(StreamChunk::Data("only".into())));
        drop(rx);

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, RelayOutcome::Cancelled { data_chunks: 1 });
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn forward_delivers_terminal_chunk() {
        let (tx, mut rx) = mpsc::channel(8);
        let upstream = tokens(vec![Ok("a"), Err(UpstreamError::Stream("eof".into()))]);
        let outcome = forward_chunks(RelayStream::from_tokens(upstream, "bad"), tx).await;
        assert_eq!(outcome, RelayOutcome::Failed { data_chunks: 1 });
        assert_eq!(rx.recv().await, Some(StreamChunk::Data("a".into())));
        assert_eq!(rx.recv().await, Some(StreamChunk::Error("bad".into())));
        assert_eq!(rx.recv().await, None);
    }
}
