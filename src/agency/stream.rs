//! Streaming view of one external call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AgencyError;
use crate::runner::{AgencyEvent, AgencyEventPayload, AgencyEventSink, EventEmitter, RunId};
use crate::types::FinalOutput;

enum Step {
    Event(AgencyEvent),
    Finished(Result<FinalOutput, AgencyError>),
}

/// Single-pass stream of [`AgencyEvent`]s for one external call.
///
/// The run is driven by polling the stream. It yields progress events in
/// emission order and ends with exactly one `done` or `error` event.
/// Dropping the stream cancels the run.
pub struct AgencyStream {
    run_id: RunId,
    cancel: CancellationToken,
    inner: BoxStream<'static, AgencyEvent>,
}

impl AgencyStream {
    pub(crate) fn spawn<F, Fut>(cancel: CancellationToken, start: F) -> Self
    where
        F: FnOnce(Arc<EventEmitter>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<FinalOutput, AgencyError>> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: AgencyEventSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        let emitter = Arc::new(EventEmitter::new(run_id, Some(sink)));
        let run = start(emitter.clone(), cancel.clone());

        let inner = async_stream::stream! {
            let mut run = std::pin::pin!(run);
            let mut events = UnboundedReceiverStream::new(rx);
            let outcome = loop {
                let step = tokio::select! {
                    biased;
                    Some(event) = events.next() => Step::Event(event),
                    outcome = &mut run => Step::Finished(outcome),
                };
                match step {
                    Step::Event(event) => yield event,
                    Step::Finished(outcome) => break outcome,
                }
            };

            let mut rx = events.into_inner();
            while let Ok(event) = rx.try_recv() {
                yield event;
            }
            let payload = match outcome {
                Ok(output) => AgencyEventPayload::Done { output },
                Err(err) => AgencyEventPayload::Error { error: err.details() },
            };
            yield emitter.envelope(payload);
        };

        Self {
            run_id,
            cancel,
            inner: Box::pin(inner),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stop the run. The stream then finishes with an `error` event of kind
    /// `canceled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for AgencyStream {
    type Item = AgencyEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for AgencyStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for AgencyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgencyStream")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
