//! weakly held, executor bound event fan-out
//!
//! [`ObserverMultiplexer`] maps observer identity to a weak handle plus the
//! executor its callbacks run on. the registry never keeps an observer alive,
//! and an observer that expired or unregistered is never invoked again, even
//! when a delivery was already queued: every dispatch re-checks liveness
//! immediately before the call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::executor::Executor;

/// one to many fan-out registry with weak, executor bound subscriptions
pub struct ObserverMultiplexer<O: ?Sized> {
    default_executor: Arc<dyn Executor>,
    observers: RwLock<Vec<Arc<Slot<O>>>>,
}

impl<O: ?Sized + Send + Sync + 'static> ObserverMultiplexer<O> {
    /// `default_executor` runs callbacks of every observer registered without
    /// an explicit executor, and must outlive all of them
    pub fn new(default_executor: Arc<dyn Executor>) -> Self {
        Self {
            default_executor,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register_interest(&self, observer: Weak<O>) {
        self.register_interest_with(observer, self.default_executor.clone());
    }

    pub fn register_interest_with(&self, observer: Weak<O>, executor: Arc<dyn Executor>) {
        let mut observers = self.observers.write().unwrap();
        observers.push(Arc::new(Slot {
            observer,
            executor,
            alive: AtomicBool::new(true),
            busy: Mutex::new(()),
            holder: AtomicU64::new(0),
        }));
    }

    /// remove `observer` by identity
    ///
    /// blocks until a delivery currently running against that entry finishes,
    /// so no callback is executing once this returns. an observer may call
    /// this on itself from inside its own callback, the in-flight delivery is
    /// then allowed to finish but no further one starts
    pub fn unregister_interest(&self, observer: &O) {
        let mut observers = self.observers.write().unwrap();
        observers.retain(|slot| !slot.retire(observer));
    }

    /// true iff no live registrations remain
    pub fn empty(&self) -> bool {
        let mut observers = self.observers.write().unwrap();
        observers.retain(|slot| !slot.expired());
        observers.is_empty()
    }

    /// run `f` against every live observer, on each observer's executor
    ///
    /// the registry is only locked while snapshotting, delivery happens
    /// outside the lock and re-checks each slot right before invoking
    pub fn for_each_observer<F>(&self, f: F)
    where
        F: Fn(&O) + Clone + Send + 'static,
    {
        for slot in self.snapshot() {
            if slot.expired() {
                continue;
            }
            let task_slot = slot.clone();
            let f = f.clone();
            slot.executor.spawn(Box::new(move || task_slot.deliver(f)));
        }
    }

    /// like [`for_each_observer`](Self::for_each_observer) but only for the
    /// observer whose identity equals `target`
    pub fn for_single_observer<F>(&self, target: &O, f: F)
    where
        F: Fn(&O) + Clone + Send + 'static,
    {
        for slot in self.snapshot() {
            if !slot.is(target) {
                continue;
            }
            let task_slot = slot.clone();
            let f = f.clone();
            slot.executor.spawn(Box::new(move || task_slot.deliver(f)));
        }
    }

    fn snapshot(&self) -> Vec<Arc<Slot<O>>> {
        self.observers.read().unwrap().clone()
    }
}

/// registry entry: weak handle, its executor, and the liveness state
///
/// `alive` is the lock-free mark-invalid flag, `busy` is held only around an
/// actual callback invocation and `holder` names the thread currently inside
/// one, which is what lets that thread unregister itself without deadlock
struct Slot<O: ?Sized> {
    observer: Weak<O>,
    executor: Arc<dyn Executor>,
    alive: AtomicBool,
    busy: Mutex<()>,
    holder: AtomicU64,
}

impl<O: ?Sized> Slot<O> {
    fn deliver(&self, f: impl Fn(&O)) {
        if !self.alive.load(Ordering::Acquire) {
            return;
        }
        let Some(observer) = self.observer.upgrade() else {
            return;
        };
        let _busy = lock(&self.busy);
        // unregister may have completed while we waited for the lock
        if !self.alive.load(Ordering::Acquire) {
            return;
        }
        self.holder.store(thread_token(), Ordering::Release);
        let reset = HolderReset(&self.holder);
        f(&observer);
        drop(reset);
    }

    /// mark this slot dead if it holds `target`, waiting out any in-flight
    /// delivery unless the caller *is* that delivery. returns true when the
    /// slot should be removed, which also covers expired observers
    fn retire(&self, target: &O) -> bool {
        if self.is(target) {
            self.alive.store(false, Ordering::Release);
            if self.holder.load(Ordering::Acquire) != thread_token() {
                drop(lock(&self.busy));
            }
            true
        } else {
            self.expired()
        }
    }

    fn is(&self, target: &O) -> bool {
        match self.observer.upgrade() {
            Some(observer) => std::ptr::addr_eq(Arc::as_ptr(&observer), target as *const O),
            None => false,
        }
    }

    fn expired(&self) -> bool {
        !self.alive.load(Ordering::Acquire) || self.observer.strong_count() == 0
    }
}

struct HolderReset<'a>(&'a AtomicU64);

impl Drop for HolderReset<'_> {
    fn drop(&mut self) {
        self.0.store(0, Ordering::Release);
    }
}

// a panicking callback poisons `busy` via the executor's unwind path,
// the poison carries no meaning for a `Mutex<()>`
fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn thread_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TOKEN: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|token| *token)
}
