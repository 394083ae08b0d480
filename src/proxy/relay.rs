//! Response-body pass-through with observation hooks.
//!
//! The forwarder hands the upstream body to the client wrapped in
//! [`ObservedBody`]. Data moves through a fixed 32 KiB working chunk:
//! upstream frames larger than that are split (zero-copy) before they
//! reach the sink, so per-request memory stays bounded regardless of body
//! size and the full body is never buffered at any layer. The wrapper also
//! carries the observation tail: exactly one latency sample (plus an error
//! mark for ≥ 400 responses) fires when the stream ends, errors, exceeds
//! the guard deadline, or is dropped by a disconnecting client.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::future::Future;
use tokio::time::Sleep;

use crate::stats::Observer;

/// Boxed error type required by the axum body adapter.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Working-chunk size of the body relay. No data frame handed to the sink
/// exceeds this.
pub const WORKING_CHUNK: usize = 32 * 1024;

/// Fires the end-of-request observations exactly once, even when the body
/// is dropped mid-stream.
struct ObservationTail {
    observer: Arc<dyn Observer>,
    prefix: String,
    started: Instant,
    failed_status: bool,
    fired: bool,
}

impl ObservationTail {
    fn fire(&mut self) {
        if self.fired {
            return;
        }
        self.fired = true;
        self.observer.latency_sample(self.started.elapsed());
        if self.failed_status {
            self.observer.request_failed(&self.prefix);
        }
    }
}

impl Drop for ObservationTail {
    fn drop(&mut self) {
        self.fire();
    }
}

pin_project_lite::pin_project! {
    /// See the module docs.
    pub struct ObservedBody<B> {
        #[pin]
        inner: B,
        #[pin]
        deadline: Sleep,
        // Remainder of an upstream frame larger than the working chunk,
        // drained before the inner body is polled again.
        pending: Bytes,
        tail: ObservationTail,
    }
}

impl<B> ObservedBody<B> {
    pub fn new(
        inner: B,
        observer: Arc<dyn Observer>,
        prefix: String,
        started: Instant,
        deadline: tokio::time::Instant,
        failed_status: bool,
    ) -> Self {
        Self {
            inner,
            deadline: tokio::time::sleep_until(deadline),
            pending: Bytes::new(),
            tail: ObservationTail {
                observer,
                prefix,
                started,
                failed_status,
                fired: false,
            },
        }
    }
}

impl<B> Body for ObservedBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let mut this = self.project();

        // The deadline is checked on every poll, so cancellation is
        // observed between chunks even when the upstream keeps producing.
        if !this.tail.fired && this.deadline.as_mut().poll(cx).is_ready() {
            this.tail.fire();
            return Poll::Ready(Some(Err(
                "guard deadline exceeded while streaming body".into()
            )));
        }

        if !this.pending.is_empty() {
            let take = this.pending.len().min(WORKING_CHUNK);
            return Poll::Ready(Some(Ok(Frame::data(this.pending.split_to(take)))));
        }

        match this.inner.poll_frame(cx) {
            Poll::Ready(None) => {
                this.tail.fire();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                Ok(mut data) => {
                    if data.len() > WORKING_CHUNK {
                        let chunk = data.split_to(WORKING_CHUNK);
                        *this.pending = data;
                        Poll::Ready(Some(Ok(Frame::data(chunk))))
                    } else {
                        Poll::Ready(Some(Ok(Frame::data(data))))
                    }
                }
                // Trailer frames pass through untouched.
                Err(frame) => Poll::Ready(Some(Ok(frame))),
            },
            Poll::Ready(Some(Err(err))) => {
                this.tail.fire();
                Poll::Ready(Some(Err(err.into())))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.tail.fired || (self.pending.is_empty() && self.inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::test_support::CountingObserver;
    use http_body_util::{BodyExt, Full};
    use std::time::Duration;

    fn far_deadline() -> tokio::time::Instant {
        tokio::time::Instant::now() + Duration::from_secs(60)
    }

    fn observed(
        payload: &'static [u8],
        observer: &Arc<CountingObserver>,
        failed_status: bool,
    ) -> ObservedBody<Full<Bytes>> {
        ObservedBody::new(
            Full::new(Bytes::from_static(payload)),
            observer.clone() as Arc<dyn Observer>,
            "/api".into(),
            Instant::now(),
            far_deadline(),
            failed_status,
        )
    }

    #[tokio::test]
    async fn clean_end_records_one_latency_sample() {
        let observer = Arc::new(CountingObserver::default());
        let body = observed(b"hello", &observer, false);

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected.as_ref(), b"hello");
        assert_eq!(observer.latencies(), 1);
        assert_eq!(observer.failures(), 0);
    }

    #[tokio::test]
    async fn failed_status_marks_error_at_end_of_stream() {
        let observer = Arc::new(CountingObserver::default());
        let body = observed(b"oops", &observer, true);

        let _ = body.collect().await.unwrap();
        assert_eq!(observer.latencies(), 1);
        assert_eq!(observer.failures(), 1);
    }

    #[tokio::test]
    async fn dropped_body_still_records_latency() {
        let observer = Arc::new(CountingObserver::default());
        let body = observed(b"never read", &observer, false);

        drop(body);
        assert_eq!(observer.latencies(), 1);
    }

    #[tokio::test]
    async fn oversized_frames_are_split_to_the_working_chunk() {
        let observer = Arc::new(CountingObserver::default());
        let payload = vec![9u8; 100 * 1024];
        let body = ObservedBody::new(
            Full::new(Bytes::from(payload.clone())),
            observer.clone() as Arc<dyn Observer>,
            "/api".into(),
            Instant::now(),
            far_deadline(),
            false,
        );

        let mut body = Box::pin(body);
        let mut seen = Vec::new();
        let mut chunks = 0;
        while let Some(frame) = body.frame().await {
            let data = frame.unwrap().into_data().unwrap();
            assert!(data.len() <= WORKING_CHUNK);
            seen.extend_from_slice(&data);
            chunks += 1;
        }
        assert_eq!(seen, payload);
        assert_eq!(chunks, 4);
        assert_eq!(observer.latencies(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_errors_the_stream() {
        let observer = Arc::new(CountingObserver::default());
        let body = ObservedBody::new(
            Full::new(Bytes::from_static(b"late")),
            observer.clone() as Arc<dyn Observer>,
            "/api".into(),
            Instant::now(),
            tokio::time::Instant::now() + Duration::from_millis(10),
            false,
        );

        tokio::time::advance(Duration::from_millis(20)).await;
        let err = body.collect().await.unwrap_err();
        assert!(err.to_string().contains("deadline"));
        assert_eq!(observer.latencies(), 1);
    }
}
