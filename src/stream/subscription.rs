//! Demand-driven subscriptions over a [`RowCursor`]

use super::cursor::RowCursor;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Receives the signals of one subscription.
pub trait Subscriber<T> {
    /// One item. `demand` may be used to request more or to cancel; a
    /// request made here only adds to the counter, the running drain loop
    /// picks it up.
    fn on_next(&mut self, item: T, demand: &Demand);

    /// The cursor is exhausted. Terminal.
    fn on_complete(&mut self) {}

    /// The cursor failed. Terminal.
    fn on_error(&mut self, error: Error);
}

/// Outstanding demand and the cancellation flag of one subscription.
#[derive(Debug, Default)]
pub struct Demand {
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl Demand {
    /// Add `n` and return the previous value. Saturates at `u64::MAX`.
    fn add(&self, n: u64) -> u64 {
        self.requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| Some(current.saturating_add(n)))
            .unwrap_or_else(|current| current)
    }

    /// Decrement by one and return the new value.
    fn take_one(&self) -> u64 {
        let previous = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| Some(current.saturating_sub(1)))
            .unwrap_or_else(|current| current);
        previous.saturating_sub(1)
    }

    pub fn request(&self, n: u64) {
        if n > 0 {
            self.add(n);
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No query has executed yet
    Pending,
    Open,
    /// Completed, failed or cancelled
    Terminated,
}

/// A lazy read that has not executed yet.
///
/// Consumed by [`Publisher::subscribe`] or iteration; a read is restarted
/// by invoking the read operation again.
#[must_use = "a publisher does nothing until it is subscribed to or iterated"]
pub struct Publisher<C> {
    cursor: C,
}

impl<C: RowCursor> Publisher<C> {
    pub fn new(cursor: C) -> Self {
        Self { cursor }
    }

    pub fn subscribe<S: Subscriber<C::Item>>(self, subscriber: S) -> Subscription<C, S> {
        Subscription {
            cursor: self.cursor,
            subscriber,
            demand: Demand::default(),
            state: State::Pending,
        }
    }

    /// Drain the whole stream into memory
    pub fn collect_all(self) -> Result<Vec<C::Item>> {
        self.into_iter().collect()
    }

    /// Pull a single item to decide whether the stream yields anything
    pub fn is_empty(self) -> Result<bool> {
        match self.into_iter().next() {
            Some(Ok(_)) => Ok(false),
            Some(Err(e)) => Err(e),
            None => Ok(true),
        }
    }
}

impl<C: RowCursor> IntoIterator for Publisher<C> {
    type Item = Result<C::Item>;
    type IntoIter = Pull<C>;

    fn into_iter(self) -> Pull<C> {
        Pull {
            subscription: self.subscribe(Slot::default()),
        }
    }
}

/// Active subscription. Dropping it closes the cursor.
pub struct Subscription<C: RowCursor, S> {
    cursor: C,
    subscriber: S,
    demand: Demand,
    state: State,
}

impl<C, S> Subscription<C, S>
where
    C: RowCursor,
    S: Subscriber<C::Item>,
{
    /// Add `n` to the outstanding demand and, unless a drain is already
    /// owed that demand, emit up to that many items on the calling thread.
    pub fn request(&mut self, n: u64) {
        if n == 0 || self.state == State::Terminated {
            return;
        }
        if self.demand.add(n) > 0 {
            return;
        }
        self.drain();
    }

    /// Stop the stream. No item is emitted once this has been observed.
    pub fn cancel(&mut self) {
        self.demand.cancel();
        self.release();
    }

    pub fn is_terminated(&self) -> bool {
        self.state == State::Terminated
    }

    pub fn demand(&self) -> &Demand {
        &self.demand
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn subscriber_mut(&mut self) -> &mut S {
        &mut self.subscriber
    }

    fn drain(&mut self) {
        if self.state == State::Pending {
            if self.demand.is_cancelled() {
                self.release();
                return;
            }
            if let Err(e) = self.cursor.open() {
                self.fail(e);
                return;
            }
            self.state = State::Open;
        }

        loop {
            if self.demand.is_cancelled() {
                self.release();
                return;
            }
            match self.cursor.advance() {
                Ok(Some(item)) => {
                    if self.demand.is_cancelled() {
                        self.release();
                        return;
                    }
                    self.subscriber.on_next(item, &self.demand);
                    if self.demand.is_cancelled() {
                        self.release();
                        return;
                    }
                    if self.cursor.is_exhausted() {
                        self.release();
                        self.subscriber.on_complete();
                        return;
                    }
                    if self.demand.take_one() == 0 {
                        return;
                    }
                }
                Ok(None) => {
                    self.release();
                    self.subscriber.on_complete();
                    return;
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, error: Error) {
        tracing::debug!("stream failed: {}", error);
        self.release();
        self.subscriber.on_error(error);
    }
}

impl<C: RowCursor, S> Subscription<C, S> {
    fn release(&mut self) {
        if self.state != State::Terminated {
            self.cursor.close();
            self.state = State::Terminated;
        }
    }
}

impl<C: RowCursor, S> Drop for Subscription<C, S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Single-item buffer behind [`Pull`]
struct Slot<T> {
    next: Option<Result<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self { next: None }
    }
}

impl<T> Subscriber<T> for Slot<T> {
    fn on_next(&mut self, item: T, _demand: &Demand) {
        self.next = Some(Ok(item));
    }

    fn on_error(&mut self, error: Error) {
        self.next = Some(Err(error));
    }
}

/// Blocking iterator face of a publisher: every `next()` requests one item.
pub struct Pull<C: RowCursor> {
    subscription: Subscription<C, Slot<C::Item>>,
}

impl<C: RowCursor> Pull<C> {
    /// Stop early and release the cursor
    pub fn cancel(&mut self) {
        self.subscription.cancel();
    }
}

impl<C: RowCursor> Iterator for Pull<C> {
    type Item = Result<C::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.subscription.subscriber_mut().next.take() {
            return Some(item);
        }
        if self.subscription.is_terminated() {
            return None;
        }
        self.subscription.request(1);
        self.subscription.subscriber_mut().next.take()
    }
}
