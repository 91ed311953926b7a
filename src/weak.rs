use std::{fmt, ptr::NonNull};

use crate::{
    block::{release_weak, Block, Counts},
    strong::{block_eq, Strong},
};

/// An observing, non-owning handle to a value managed by [`Strong`] handles.
///
/// A `Weak` never keeps the value alive and never reaches it directly; the
/// only path to the value is [`upgrade`][Weak::upgrade], which hands out a
/// fresh `Strong` while the value still exists. What a `Weak` does keep alive
/// is the shared bookkeeping, so [`expired`][Weak::expired] stays answerable
/// after the value is gone.
///
/// # Examples
///
/// ```
/// # use std::mem::drop;
/// # use tether::Strong;
/// let s = Strong::new(5);
/// let w = s.downgrade();
///
/// assert!(*w.upgrade().unwrap() == 5);
///
/// drop(s);
/// assert!(w.expired());
/// assert!(w.upgrade().is_none());
/// ```
pub struct Weak<T>
where
    T: 'static,
{
    pub(crate) block: Option<NonNull<dyn Block<T>>>,
}

impl<T> Weak<T> {
    /// See [`Strong::downgrade`].
    pub fn new(strong: &Strong<T>) -> Self {
        strong.downgrade()
    }

    /// Creates an empty weak handle: it observes nothing, and it is already
    /// [`expired`][Weak::expired]. Same as `Default`.
    pub const fn empty() -> Self {
        Weak { block: None }
    }

    /// Attempts to promote this handle into a [`Strong`]. Returns `None` once
    /// the value has been destroyed.
    ///
    /// The strong count is read before it is touched: promotion only happens
    /// while the count is positive, so a destroyed value is never brought
    /// back, no matter how the surviving weak handles are exercised.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        let block = self.block?;
        let b = unsafe { &*block.as_ptr() };

        if b.counts().strong() == 0 {
            return None;
        }

        b.counts().inc_strong();
        Some(Strong {
            block: Some(block),
            ptr: b.get().as_ptr(),
        })
    }

    /// Whether the observed value has already been destroyed. An empty weak
    /// handle is expired.
    pub fn expired(&self) -> bool {
        self.strong_count() == 0
    }

    /// The number of [`Strong`] handles currently keeping the value alive.
    /// `0` once the value is gone, or for an empty handle.
    pub fn strong_count(&self) -> usize {
        self.counts().map_or(0, Counts::strong)
    }

    /// The number of `Weak` handles observing this value, including this one.
    pub fn weak_count(&self) -> usize {
        self.counts().map_or(0, Counts::weak)
    }

    /// Stops observing and leaves the handle empty. If this was the last
    /// handle of either kind, the block storage is freed; the value itself is
    /// never touched from here.
    pub fn reset(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { release_weak(block) };
        }
    }

    /// Whether two handles observe one control block. Empty handles compare
    /// equal to each other.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        block_eq(self.block, other.block)
    }

    fn counts(&self) -> Option<&Counts> {
        self.block.map(|block| unsafe { (*block.as_ptr()).counts() })
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { (*block.as_ptr()).counts().inc_weak() };
        }

        Weak { block: self.block }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            unsafe { release_weak(block) };
        }
    }
}

impl<T> Default for Weak<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<&Strong<T>> for Weak<T> {
    fn from(value: &Strong<T>) -> Self {
        Self::new(value)
    }
}

impl<T> fmt::Debug for Weak<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("Weak");
        if let Some(strong) = self.upgrade() {
            f.field(&*strong);
        }
        f.finish()
    }
}
