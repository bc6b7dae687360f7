//! A lazy event sequence with an attached one-shot result.
//!
//! Producers `push` events; a configured predicate decides which event
//! completes the stream, and a companion extractor derives the final
//! result from it. Readers drain queued events first and then suspend
//! until more arrive; the result can be awaited independently of
//! iteration. Ordering is strictly FIFO and exactly one producer is
//! expected.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A boxed async stream (provider-facing streaming responses).
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

struct StreamState<T, R> {
    queue: VecDeque<T>,
    done: bool,
    result: Option<R>,
}

struct Inner<T, R> {
    state: Mutex<StreamState<T, R>>,
    event_notify: Notify,
    result_notify: Notify,
    is_complete: Box<dyn Fn(&T) -> bool + Send + Sync>,
    extract_result: Box<dyn Fn(&T) -> R + Send + Sync>,
}

pub struct EventStream<T, R> {
    inner: Arc<Inner<T, R>>,
}

impl<T, R> Clone for EventStream<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, R: Clone> EventStream<T, R> {
    pub fn new(
        is_complete: impl Fn(&T) -> bool + Send + Sync + 'static,
        extract_result: impl Fn(&T) -> R + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StreamState {
                    queue: VecDeque::new(),
                    done: false,
                    result: None,
                }),
                event_notify: Notify::new(),
                result_notify: Notify::new(),
                is_complete: Box::new(is_complete),
                extract_result: Box::new(extract_result),
            }),
        }
    }

    /// Push an event into the stream. If the event marks completion, the
    /// result is resolved and the stream is closed — the completing event
    /// is still delivered to readers. Pushes after close are discarded.
    pub fn push(&self, event: T) {
        {
            let mut state = self.inner.state.lock();
            if state.done {
                return;
            }
            if (self.inner.is_complete)(&event) {
                state.done = true;
                if state.result.is_none() {
                    state.result = Some((self.inner.extract_result)(&event));
                }
                self.inner.result_notify.notify_waiters();
            }
            state.queue.push_back(event);
        }
        self.inner.event_notify.notify_waiters();
    }

    /// Close the stream and wake all readers. Sets the result iff one was
    /// provided and none was resolved yet.
    pub fn end(&self, result: Option<R>) {
        {
            let mut state = self.inner.state.lock();
            state.done = true;
            if let Some(r) = result {
                if state.result.is_none() {
                    state.result = Some(r);
                }
            }
        }
        self.inner.event_notify.notify_waiters();
        self.inner.result_notify.notify_waiters();
    }

    /// Next event: queued events first, then suspend for new ones.
    /// Returns `None` once the stream is closed and drained.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.inner.event_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(event) = state.queue.pop_front() {
                    return Some(event);
                }
                if state.done {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Await the final result. Resolves to `None` when the stream ends
    /// without ever producing a result.
    pub async fn result(&self) -> Option<R> {
        loop {
            let notified = self.inner.result_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.state.lock();
                if let Some(r) = &state.result {
                    return Some(r.clone());
                }
                if state.done {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().done
    }
}
