//! Application threading primitives
//!
//! Available from an environment created with
//! [`EnvMode::THREADED`](crate::EnvMode::THREADED).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Application mutex
///
/// Clones share the same lock.
#[derive(Clone, Default)]
pub struct Mutex {
    inner: Arc<parking_lot::Mutex<()>>,
}

/// Guard returned by [`Mutex::acquire`], releases on drop
pub struct MutexGuard<'a> {
    _guard: parking_lot::MutexGuard<'a, ()>,
}

impl Mutex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until the mutex is acquired
    pub fn acquire(&self) -> MutexGuard<'_> {
        MutexGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Acquire the mutex if it is free
    pub fn try_acquire(&self) -> Option<MutexGuard<'_>> {
        self.inner.try_lock().map(|guard| MutexGuard { _guard: guard })
    }

    /// Check whether some thread holds the mutex
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

type Slots<T> = parking_lot::Mutex<HashMap<ThreadId, T>>;
pub(crate) type KeyNames = parking_lot::Mutex<HashSet<String>>;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Cleanups run when a thread exits, one per key the thread stored a value in
#[derive(Default)]
struct ExitHooks(RefCell<HashMap<u64, Box<dyn FnOnce()>>>);

impl Drop for ExitHooks {
    fn drop(&mut self) {
        for (_, hook) in self.0.get_mut().drain() {
            hook();
        }
    }
}

thread_local! {
    static EXIT_HOOKS: ExitHooks = ExitHooks::default();
}

struct KeyInner<T> {
    id: u64,
    name: String,
    values: Arc<Slots<T>>,
    names: Weak<KeyNames>,
}

impl<T> Drop for KeyInner<T> {
    fn drop(&mut self) {
        if let Some(names) = self.names.upgrade() {
            names.lock().remove(&self.name);
        }
    }
}

/// Named slot holding one value per thread
///
/// A thread's value is dropped when the thread exits. The name becomes
/// available again once the last clone of the key is dropped.
pub struct ThreadKey<T> {
    inner: Arc<KeyInner<T>>,
}

impl<T: Clone + Send + 'static> ThreadKey<T> {
    pub(crate) fn new(name: &str, names: Weak<KeyNames>) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                id: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                values: Arc::new(parking_lot::Mutex::new(HashMap::new())),
                names,
            }),
        }
    }

    /// Key name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Store the calling thread's value, returning the previous one
    pub fn set(&self, value: T) -> Option<T> {
        let current = thread::current().id();
        let previous = self.inner.values.lock().insert(current, value);
        self.register_exit_hook(current);
        previous
    }

    /// Read the calling thread's value
    pub fn get(&self) -> Option<T> {
        self.inner.values.lock().get(&thread::current().id()).cloned()
    }

    /// Remove the calling thread's value
    pub fn take(&self) -> Option<T> {
        self.inner.values.lock().remove(&thread::current().id())
    }

    /// Number of threads currently holding a value
    pub fn len(&self) -> usize {
        self.inner.values.lock().len()
    }

    /// Check whether no thread holds a value
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register_exit_hook(&self, current: ThreadId) {
        let values = Arc::downgrade(&self.inner.values);
        // the thread may already be tearing down its locals
        let _ = EXIT_HOOKS.try_with(|hooks| {
            hooks.0.borrow_mut().entry(self.inner.id).or_insert_with(|| {
                Box::new(move || {
                    if let Some(values) = values.upgrade() {
                        values.lock().remove(&current);
                    }
                })
            });
        });
    }
}

impl<T> Clone for ThreadKey<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ThreadKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadKey").field("name", &self.inner.name).finish()
    }
}
