//! Message bodies: either already in memory or still arriving.

use std::fmt;

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};

use crate::handler::BoxError;

/// A body stream handed over by the transport.
pub type Stream = UnsyncBoxBody<Bytes, BoxError>;

/// Reading a streamed body failed.
///
/// Cloneable because the failure is remembered: every later read of the same
/// body observes the same error.
#[derive(Clone, Debug, Error)]
#[error("failed to read body: {0}")]
pub struct BodyError(String);

/// Body storage shared by every message derived from the same original.
///
/// The first reader drains `pending` frame by frame into its buffer; everyone
/// else waits on `ready`. A reader that is dropped halfway leaves the stream
/// and the bytes read so far in place for the next one.
pub(crate) struct Body {
    pending: Mutex<Option<Pending>>,
    ready: OnceCell<Result<Bytes, BodyError>>,
}

struct Pending {
    stream: Stream,
    buffered: BytesMut,
}

impl Body {
    pub(crate) fn full(bytes: Bytes) -> Self {
        Self { pending: Mutex::new(None), ready: OnceCell::new_with(Some(Ok(bytes))) }
    }

    pub(crate) fn empty() -> Self { Self::full(Bytes::new()) }

    pub(crate) fn streaming(stream: Stream) -> Self {
        let pending = Pending { stream, buffered: BytesMut::new() };
        Self { pending: Mutex::new(Some(pending)), ready: OnceCell::new() }
    }

    pub(crate) async fn read(&self) -> Result<Bytes, BodyError> {
        self.ready
            .get_or_init(|| async {
                let mut slot = self.pending.lock().await;
                let Some(pending) = slot.as_mut() else {
                    return Ok(Bytes::new());
                };
                while let Some(frame) = pending.stream.frame().await {
                    let frame = frame.map_err(|e| BodyError(e.to_string()))?;
                    if let Ok(data) = frame.into_data() {
                        pending.buffered.extend_from_slice(&data);
                    }
                }
                let bytes = pending.buffered.split().freeze();
                *slot = None;
                Ok(bytes)
            })
            .await
            .clone()
    }

    /// True while a stream is pending, even if it will turn out to be empty.
    pub(crate) fn is_present(&self) -> bool {
        match self.ready.get() {
            Some(Ok(bytes)) => !bytes.is_empty(),
            Some(Err(_)) => false,
            None => true,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ready.get() {
            Some(Ok(bytes)) => write!(f, "Body({} bytes)", bytes.len()),
            Some(Err(e)) => write!(f, "Body({e})"),
            None => f.write_str("Body(pending)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full, StreamBody};
    use hyper::body::Frame;

    use super::*;

    fn stream_of(chunks: &[&'static str]) -> Stream {
        let frames = chunks
            .iter()
            .map(|c| Ok::<_, BoxError>(Frame::data(Bytes::from_static(c.as_bytes()))))
            .collect::<Vec<_>>();
        StreamBody::new(futures::stream::iter(frames)).boxed_unsync()
    }

    #[tokio::test]
    async fn full_body_reads_back_without_streaming() {
        let body = Body::full(Bytes::from_static(b"hello"));
        assert_eq!(body.read().await.expect("read"), "hello");
    }

    #[tokio::test]
    async fn stream_is_consumed_once_and_cached() {
        let body = Body::streaming(stream_of(&["ab", "cd"]));
        assert!(body.is_present());

        assert_eq!(body.read().await.expect("first read"), "abcd");
        assert_eq!(body.read().await.expect("second read"), "abcd");
        assert!(body.pending.lock().await.is_none());
    }

    #[tokio::test]
    async fn abandoned_read_keeps_what_it_already_received() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Frame<Bytes>, BoxError>>();
        let body = Body::streaming(StreamBody::new(rx).boxed_unsync());

        tx.unbounded_send(Ok(Frame::data(Bytes::from_static(b"ab")))).expect("send");
        let abandoned = tokio::time::timeout(Duration::from_millis(20), body.read()).await;
        assert!(abandoned.is_err());
        assert!(body.is_present());

        tx.unbounded_send(Ok(Frame::data(Bytes::from_static(b"cd")))).expect("send");
        drop(tx);
        assert_eq!(body.read().await.expect("read"), "abcd");
        assert_eq!(body.read().await.expect("cached"), "abcd");
    }

    #[tokio::test]
    async fn stream_failure_is_remembered() {
        let failing = futures::stream::iter([Err::<Frame<Bytes>, BoxError>("connection reset".into())]);
        let body = Body::streaming(StreamBody::new(failing).boxed_unsync());

        let first = body.read().await.expect_err("must fail");
        let second = body.read().await.expect_err("still failed");
        assert_eq!(first.to_string(), second.to_string());
        assert!(first.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn empty_stream_reports_present_until_read() {
        let body = Body::streaming(Full::new(Bytes::new()).map_err(BoxError::from).boxed_unsync());
        assert!(body.is_present());

        body.read().await.expect("read");
        assert!(!body.is_present());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_see_the_same_bytes() {
        let body = Arc::new(Body::streaming(stream_of(&["x", "y", "z"])));
        let readers: Vec<_> = (0..16)
            .map(|_| {
                let body = Arc::clone(&body);
                tokio::spawn(async move { body.read().await })
            })
            .collect();

        for reader in readers {
            assert_eq!(reader.await.expect("join").expect("read"), "xyz");
        }
    }
}
