//! The merged view of everything known about the device.
//!
//! [`DeviceState`] is shared by reference between the ingest path, which
//! writes, and any number of readers. Subscribers are not called from
//! `update`: applied batches are queued and delivered by
//! [`DeviceState::dispatch_pending`] or [`DeviceState::dispatch_until`], so
//! a slow subscriber never stalls frame processing.

use log::{debug, trace, warn};

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crate::codec::DecodedValue;

/// One applied key of an update batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub name: String,
    pub value: DecodedValue,
    pub at: Instant,
    /// False when the key already held an equal value.
    pub changed: bool,
}

type Subscriber = Arc<dyn Fn(&[Change]) + Send + Sync>;

#[derive(Debug, Clone)]
struct Entry {
    value: DecodedValue,
    updated: Instant,
}

// The store only holds plain data, a panic elsewhere can't leave it inconsistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Latest known value of every variable, keyed by name.
pub struct DeviceState {
    values: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<Vec<Subscriber>>,
    outbox: Mutex<SyncSender<Vec<Change>>>,
    inbox: Mutex<Receiver<Vec<Change>>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceState")
            .field("values", &lock(&self.values).len())
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

/// Undelivered batches kept when no dispatcher is running.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

impl DeviceState {
    pub fn new() -> Self {
        Self::with_outbox_capacity(DEFAULT_OUTBOX_CAPACITY)
    }

    /// Keep at most `capacity` undelivered batches; beyond that the oldest
    /// batch is discarded.
    pub fn with_outbox_capacity(capacity: usize) -> Self {
        let (tx, rx) = sync_channel(capacity.max(1));
        Self {
            values: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            outbox: Mutex::new(tx),
            inbox: Mutex::new(rx),
        }
    }

    /// Merge a single value. Returns false if a newer value was already stored.
    pub fn update(&self, name: &str, value: DecodedValue, at: Instant) -> bool {
        self.update_many([(name, value)], at) == 1
    }

    /// Merge several values as one batch: readers see all of them or none.
    ///
    /// Keys whose stored value is newer than `at` are left alone. Returns the
    /// number of keys applied.
    pub fn update_many<I, K>(&self, items: I, at: Instant) -> usize
    where
        I: IntoIterator<Item = (K, DecodedValue)>,
        K: Into<String>,
    {
        let mut batch = Vec::new();
        {
            let mut values = lock(&self.values);
            for (name, value) in items {
                let name = name.into();
                let changed = match values.get(&name) {
                    Some(entry) if entry.updated > at => {
                        trace!("dropping stale update of {}", name);
                        continue;
                    }
                    Some(entry) => entry.value != value,
                    None => true,
                };
                values.insert(
                    name.clone(),
                    Entry {
                        value: value.clone(),
                        updated: at,
                    },
                );
                batch.push(Change {
                    name,
                    value,
                    at,
                    changed,
                });
            }
        }
        let applied = batch.len();
        // nothing is queued while nobody listens
        if applied > 0 && !lock(&self.subscribers).is_empty() {
            self.queue(batch);
        }
        applied
    }

    fn queue(&self, batch: Vec<Change>) {
        let outbox = lock(&self.outbox);
        let batch = match outbox.try_send(batch) {
            Ok(()) => return,
            Err(TrySendError::Full(batch)) => batch,
            // the receiver lives in self
            Err(TrySendError::Disconnected(_)) => return,
        };
        // a dispatcher holding the inbox is draining it already
        let inbox = match self.inbox.try_lock() {
            Ok(inbox) => inbox,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!("State outbox full, dropping a batch of {}", batch.len());
                return;
            }
        };
        if inbox.try_recv().is_ok() {
            warn!("State outbox full, dropped the oldest batch");
        }
        drop(inbox);
        if outbox.try_send(batch).is_err() {
            warn!("State outbox full, dropping the newest batch");
        }
    }

    pub fn get(&self, name: &str) -> Option<(DecodedValue, Instant)> {
        lock(&self.values)
            .get(name)
            .map(|e| (e.value.clone(), e.updated))
    }

    pub fn value(&self, name: &str) -> Option<DecodedValue> {
        self.get(name).map(|(v, _)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.values).contains_key(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of all values, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, (DecodedValue, Instant)> {
        lock(&self.values)
            .iter()
            .map(|(k, e)| (k.clone(), (e.value.clone(), e.updated)))
            .collect()
    }

    /// Register a callback receiving every applied batch.
    pub fn subscribe(&self, callback: impl Fn(&[Change]) + Send + Sync + 'static) {
        lock(&self.subscribers).push(Arc::new(callback));
    }

    fn deliver(&self, batch: &[Change]) {
        let subscribers: Vec<Subscriber> = lock(&self.subscribers).clone();
        for subscriber in subscribers {
            if catch_unwind(AssertUnwindSafe(|| subscriber(batch))).is_err() {
                warn!("State subscriber panicked");
            }
        }
    }

    /// Deliver queued batches on the calling thread. Returns the number of batches.
    pub fn dispatch_pending(&self) -> usize {
        let batches: Vec<Vec<Change>> = lock(&self.inbox).try_iter().collect();
        for batch in &batches {
            self.deliver(batch);
        }
        batches.len()
    }

    /// Deliver batches as they arrive until `stop` is set, checking it at
    /// least every `tick`.
    pub fn dispatch_until(&self, stop: &AtomicBool, tick: Duration) {
        debug!("State dispatcher running");
        while !stop.load(Ordering::SeqCst) {
            let batch = lock(&self.inbox).recv_timeout(tick);
            match batch {
                Ok(batch) => self.deliver(&batch),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.dispatch_pending();
        debug!("State dispatcher stopped");
    }
}
