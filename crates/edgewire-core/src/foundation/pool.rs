//! Free-list pools for short-lived, high-churn objects.
//!
//! Pools are plain values constructed once and injected where needed, so a
//! test can always start from a fresh one.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// An object that can be recycled through a [`Pool`].
pub trait Poolable: Send {
    /// Clears all per-use state. Called before the object re-enters the pool.
    fn reset(&mut self);
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Mutex-protected free list.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    factory: Factory<T>,
    max_idle: usize,
    created: AtomicUsize,
}

impl<T: Poolable> Pool<T> {
    /// Creates a pool that keeps at most `max_idle` released objects.
    pub fn new<F>(max_idle: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    /// Takes an object from the free list, or builds a new one.
    pub fn acquire(&self) -> T {
        if let Some(item) = self.idle.lock().pop() {
            return item;
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
    }

    /// Resets `item` and puts it back. Dropped if the pool is full.
    pub fn release(&self, mut item: T) {
        item.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }

    /// Acquires an object that returns itself to the pool when dropped.
    pub fn acquire_owned(self: &Arc<Self>) -> Pooled<T> {
        Pooled {
            item: Some(self.acquire()),
            pool: Arc::clone(self),
        }
    }

    /// Number of objects waiting in the free list.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of objects ever built by the factory.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<T: Poolable + Default + 'static> Pool<T> {
    /// Creates a pool that builds objects with `T::default()`.
    pub fn with_default(max_idle: usize) -> Self {
        Self::new(max_idle, T::default)
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle.lock().len())
            .field("max_idle", &self.max_idle)
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// RAII handle to a pooled object.
///
/// Release happens in `Drop`, so it also runs while unwinding.
pub struct Pooled<T: Poolable> {
    /// `Some` until dropped.
    item: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item taken before drop"),
        }
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item taken before drop"),
        }
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Buf(Vec<u8>);

    impl Poolable for Buf {
        fn reset(&mut self) {
            self.0.clear();
        }
    }

    #[test]
    fn test_reuse_after_release() {
        let pool = Pool::<Buf>::with_default(4);
        let mut b = pool.acquire();
        b.0.extend_from_slice(b"hello");
        pool.release(b);
        assert_eq!(pool.idle(), 1);

        let b = pool.acquire();
        assert!(b.0.is_empty());
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_max_idle_is_respected() {
        let pool = Pool::<Buf>::with_default(1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_pooled_releases_on_drop() {
        let pool = Arc::new(Pool::<Buf>::with_default(4));
        {
            let mut b = pool.acquire_owned();
            b.0.push(1);
        }
        assert_eq!(pool.idle(), 1);
        assert!(pool.acquire().0.is_empty());
    }

    #[test]
    fn test_pooled_releases_on_panic() {
        let pool = Arc::new(Pool::<Buf>::with_default(4));
        let p = Arc::clone(&pool);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _b = p.acquire_owned();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(pool.idle(), 1);
    }
}
