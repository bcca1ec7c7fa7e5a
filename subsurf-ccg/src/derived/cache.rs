//! Lazily built, thread-safe caches of derived mesh arrays.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock,
};

/// A value built on first access.
///
/// Concurrent readers see either nothing or the complete value; the builder
/// runs at most once unless it fails.
///
/// ```
/// # use subsurf_ccg::derived::LazyCache;
/// let cache = LazyCache::new();
/// assert!(!cache.is_ready());
/// assert_eq!(*cache.get_or_init(|| 42), 42);
/// assert_eq!(*cache.get_or_init(|| 0), 42);
/// ```
#[derive(Debug)]
pub struct LazyCache<T> {
    ready: AtomicBool,
    value: RwLock<Option<Arc<T>>>,
}

impl<T> Default for LazyCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LazyCache<T> {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            value: RwLock::new(None),
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The value if it was built.
    pub fn get(&self) -> Option<Arc<T>> {
        if !self.is_ready() {
            return None;
        }
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> Arc<T> {
        match self.get_or_try_init(|| Ok::<_, std::convert::Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Builds the value with `init` unless another caller already did.
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let mut slot = self.value.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = Arc::new(init()?);
        *slot = Some(value.clone());
        self.ready.store(true, Ordering::Release);
        Ok(value)
    }

    /// Mutable access to a built value, cloning it if it is shared.
    pub fn get_mut(&mut self) -> Option<&mut T>
    where
        T: Clone,
    {
        self.value
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(Arc::make_mut)
    }

    /// Drops the value; the next access rebuilds it.
    pub fn invalidate(&mut self) {
        *self.value.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        self.ready.store(false, Ordering::Release);
    }
}
