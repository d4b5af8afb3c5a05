//! Subscribers that record what they observe, for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Payload, StreamError, Subscriber, Subscription};

#[derive(Debug, Default)]
pub(crate) struct Record {
    pub subscriptions: usize,
    pub subscription: Option<Subscription>,
    pub items: Vec<Payload>,
    pub completions: usize,
    pub errors: Vec<StreamError>,
}

impl Record {
    pub fn terminal_count(&self) -> usize {
        self.completions + self.errors.len()
    }
}

/// Cloneable handle: the stream owns one clone, the test keeps another.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    record: Arc<Mutex<Record>>,
    /// Requested on subscribe.
    initial: u32,
    /// Requested from inside every `on_next`.
    per_item: u32,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requesting(initial: u32) -> Self {
        Self {
            initial,
            ..Self::default()
        }
    }

    pub fn requesting_per_item(initial: u32, per_item: u32) -> Self {
        Self {
            initial,
            per_item,
            ..Self::default()
        }
    }

    /// The subscription handed over on subscribe.
    pub fn subscription(&self) -> Option<Subscription> {
        self.record.lock().subscription.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Record) -> R) -> R {
        f(&self.record.lock())
    }
}

impl Subscriber for Recorder {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.initial > 0 {
            subscription.request(self.initial);
        }
        let mut record = self.record.lock();
        record.subscriptions += 1;
        record.subscription = Some(subscription);
    }

    fn on_next(&mut self, payload: Payload) {
        let mut record = self.record.lock();
        record.items.push(payload);
        if let (Some(subscription), true) = (&record.subscription, self.per_item > 0) {
            subscription.request(self.per_item);
        }
    }

    fn on_complete(&mut self) {
        self.record.lock().completions += 1;
    }

    fn on_error(&mut self, error: StreamError) {
        self.record.lock().errors.push(error);
    }
}
