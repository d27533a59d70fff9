//! Listener registry with replay-on-subscribe.
//!
//! Values are queued in publish order and delivered with no lock held, so a
//! listener may read or publish the state it is observing.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    listeners: BTreeMap<u64, Callback<T>>,
}

enum Delivery<T> {
    All(T),
    /// Replay for a listener that just subscribed
    One(u64, T),
}

struct Outbox<T> {
    queued: VecDeque<Delivery<T>>,
    delivering: bool,
}

/// Set of callbacks notified with successive snapshots of some state.
///
/// Cloning yields another handle to the same registry.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
    outbox: Arc<Mutex<Outbox<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            outbox: Arc::clone(&self.outbox),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets another thread take over delivery if a listener panics.
struct Delivering<'a, T>(&'a Mutex<Outbox<T>>);

impl<T> Drop for Delivering<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Ok(mut outbox) = self.0.lock() {
                outbox.delivering = false;
            }
        }
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
            outbox: Arc::new(Mutex::new(Outbox {
                queued: VecDeque::new(),
                delivering: false,
            })),
        }
    }

    /// Register `listener` and replay the value `current` returns to it.
    ///
    /// `current` runs in publish order with [`Listeners::publish`], so the
    /// replay is never older than a value the listener already received.
    pub fn subscribe<F>(&self, current: impl FnOnce() -> T, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut outbox = self.outbox.lock().unwrap();
            let id = {
                let mut reg = self.registry.lock().unwrap();
                let id = reg.next_id;
                reg.next_id += 1;
                reg.listeners.insert(id, Arc::new(listener));
                id
            };
            outbox.queued.push_back(Delivery::One(id, current()));
            id
        };
        self.flush();

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().unwrap().listeners.remove(&id);
                }
            })),
        }
    }

    /// Queue the value `snapshot` returns for every listener and deliver it.
    ///
    /// `snapshot` may take the caller's own state lock; listeners run only
    /// after it has returned.
    pub fn publish(&self, snapshot: impl FnOnce() -> T) {
        {
            let mut outbox = self.outbox.lock().unwrap();
            outbox.queued.push_back(Delivery::All(snapshot()));
        }
        self.flush();
    }

    /// Deliver queued values in order. If another caller is already
    /// delivering, it picks up whatever was queued here.
    fn flush(&self) {
        {
            let mut outbox = self.outbox.lock().unwrap();
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }
        let _guard = Delivering(&self.outbox);

        loop {
            let next = {
                let mut outbox = self.outbox.lock().unwrap();
                match outbox.queued.pop_front() {
                    Some(next) => next,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };
            match next {
                Delivery::All(value) => {
                    let snapshot: Vec<Callback<T>> = self
                        .registry
                        .lock()
                        .unwrap()
                        .listeners
                        .values()
                        .cloned()
                        .collect();
                    for listener in snapshot {
                        listener(&value);
                    }
                }
                Delivery::One(id, value) => {
                    let listener = self.registry.lock().unwrap().listeners.get(&id).cloned();
                    if let Some(listener) = listener {
                        listener(&value);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().unwrap().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`; the listener stays registered until this
/// is dropped or [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Keep the listener registered for the life of the process.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
