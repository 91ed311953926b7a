use std::{fmt, ops::Deref, ptr, ptr::NonNull};

use crate::{
    alloc::{AllocError, BlockAlloc, Heap},
    block::{release_strong, Block, Counts, InlineBlock, PointerBlock},
    weak::Weak,
};

/// An owning, reference counted handle. The managed value lives exactly as
/// long as at least one `Strong` to it does.
///
/// A `Strong` is either *owning* or *empty*. [`Strong::new`] and its variants
/// produce owning handles; [`Strong::empty`], [`reset`][Strong::reset], and
/// `Default` produce or leave behind empty ones. Dereferencing an empty handle
/// panics; use [`get`][Strong::get] or [`is_empty`][Strong::is_empty] when a
/// handle may be empty.
///
/// # Examples
///
/// ```
/// # use tether::Strong;
/// let s1 = Strong::new(5);
/// let s2 = s1.clone();
///
/// assert!(*s1 == 5);
/// assert!(s1.strong_count() == 2);
/// assert!(s1.ptr_eq(&s2));
/// ```
pub struct Strong<T>
where
    T: 'static,
{
    pub(crate) block: Option<NonNull<dyn Block<T>>>,
    pub(crate) ptr: *const T,
}

impl<T> Strong<T> {
    /// Creates a handle over `value`, stored inside the control block's own
    /// allocation. One heap allocation covers both value and bookkeeping.
    ///
    /// Aborts the process if storage cannot be obtained, like the `std`
    /// containers do. Use [`try_new`][Strong::try_new] to observe the failure
    /// instead.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Strong;
    /// let s = Strong::new(String::from("a"));
    /// assert!(*s == "a");
    /// ```
    pub fn new(value: T) -> Self {
        Self::new_in(value, Heap)
    }

    /// Like [`Strong::new`], with the combined allocation obtained from
    /// `alloc`. The allocator moves into the block and later frees it.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::{Pool, Strong};
    /// static POOL: Pool = Pool::new();
    ///
    /// let s = Strong::new_in(5, &POOL);
    /// assert!(*s == 5);
    /// ```
    pub fn new_in<A>(value: T, alloc: A) -> Self
    where
        A: BlockAlloc + 'static,
    {
        match Self::try_new_in(value, alloc) {
            Ok(strong) => strong,
            Err(_) => std::alloc::handle_alloc_error(InlineBlock::<T, A>::layout()),
        }
    }

    /// Fallible [`Strong::new`]. On failure the value is dropped and an
    /// [`AllocError`] is returned; no handle and no shared state exist.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        Self::try_new_in(value, Heap)
    }

    /// Fallible [`Strong::new_in`].
    pub fn try_new_in<A>(value: T, alloc: A) -> Result<Self, AllocError>
    where
        A: BlockAlloc + 'static,
    {
        let layout = InlineBlock::<T, A>::layout();
        let raw = match alloc.allocate(layout) {
            Some(raw) => raw,
            None => return Err(AllocError {
                size: layout.size(),
            }),
        };

        unsafe {
            let block = InlineBlock::init(raw, value, alloc);
            Ok(Self::from_block(block.as_ptr() as *mut dyn Block<T>))
        }
    }

    /// Takes ownership of a value allocated with [`Box`]. The value keeps its
    /// original allocation; the control block is a separate, smaller one.
    ///
    /// Equivalent to `unsafe { Strong::from_raw(Box::into_raw(b)) }`.
    fn from_box(b: Box<T>) -> Self {
        unsafe { Self::from_raw(Box::into_raw(b)) }
    }

    /// Takes ownership of `ptr`, to be released with [`Box`] delete semantics
    /// once the last `Strong` is gone.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `Box::into_raw` and must not be owned or
    /// freed by anyone else afterwards.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Strong;
    /// let ptr = Box::into_raw(Box::new(5));
    /// let s = unsafe { Strong::from_raw(ptr) };
    /// assert!(*s == 5);
    /// ```
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self::from_raw_parts(ptr, |p: *mut T| drop(unsafe { Box::from_raw(p) }), Heap)
    }

    /// Takes ownership of `ptr`, to be released by calling `deleter` on it
    /// once the last `Strong` is gone.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for the deleter's scheme of cleanup, and must not
    /// be owned or freed by anyone else afterwards.
    pub unsafe fn from_raw_with<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: FnOnce(*mut T) + 'static,
    {
        Self::from_raw_parts(ptr, deleter, Heap)
    }

    /// Takes ownership of `ptr` with a custom deleter and a custom allocator
    /// for the control block metadata. The allocator never touches the value's
    /// own storage; that is the deleter's job.
    ///
    /// Aborts the process if block storage cannot be obtained. Use
    /// [`try_from_raw_parts`][Strong::try_from_raw_parts] to observe the
    /// failure instead.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw_with`][Strong::from_raw_with].
    pub unsafe fn from_raw_parts<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where
        D: FnOnce(*mut T) + 'static,
        A: BlockAlloc + 'static,
    {
        match Self::try_from_raw_parts(ptr, deleter, alloc) {
            Ok(strong) => strong,
            Err(_) => std::alloc::handle_alloc_error(PointerBlock::<T, D, A>::layout()),
        }
    }

    /// Fallible [`from_raw_parts`][Strong::from_raw_parts]. On failure the
    /// deleter is invoked on `ptr` before the error is returned, so the value
    /// is not leaked and the caller holds nothing afterwards.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw_with`][Strong::from_raw_with].
    pub unsafe fn try_from_raw_parts<D, A>(
        ptr: *mut T,
        deleter: D,
        alloc: A,
    ) -> Result<Self, AllocError>
    where
        D: FnOnce(*mut T) + 'static,
        A: BlockAlloc + 'static,
    {
        let layout = PointerBlock::<T, D, A>::layout();
        let raw = match alloc.allocate(layout) {
            Some(raw) => raw,
            None => {
                deleter(ptr);
                return Err(AllocError {
                    size: layout.size(),
                });
            }
        };

        let block = PointerBlock::init(raw, NonNull::new_unchecked(ptr), deleter, alloc);
        Ok(Self::from_block(block.as_ptr() as *mut dyn Block<T>))
    }

    /// Creates an empty handle. Same as `Default`.
    pub const fn empty() -> Self {
        Strong {
            block: None,
            ptr: ptr::null(),
        }
    }

    /// Wraps a freshly initialized block whose strong count already includes
    /// the handle being created here.
    unsafe fn from_block(block: *mut dyn Block<T>) -> Self {
        let ptr = (*block).get().as_ptr() as *const T;

        Strong {
            block: Some(NonNull::new_unchecked(block)),
            ptr,
        }
    }

    /// Gets a reference to the value, or `None` if the handle is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Strong;
    /// let mut s = Strong::new(5);
    /// assert!(s.get() == Some(&5));
    ///
    /// s.reset();
    /// assert!(s.get().is_none());
    /// ```
    pub fn get(&self) -> Option<&T> {
        self.block.map(|_| unsafe { &*self.ptr })
    }

    /// Whether this handle currently owns anything.
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Gets a raw pointer to the value. Null when the handle is empty.
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    /// The number of `Strong` handles sharing this value. Positive while this
    /// handle owns; `0` for an empty handle.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use tether::Strong;
    /// let s1 = Strong::new(5);
    /// assert!(s1.strong_count() == 1);
    ///
    /// let s2 = s1.clone();
    /// assert!(s1.strong_count() == 2);
    ///
    /// drop(s2);
    /// assert!(s1.strong_count() == 1);
    /// ```
    pub fn strong_count(&self) -> usize {
        self.counts().map_or(0, Counts::strong)
    }

    /// The number of [`Weak`] handles observing this value. `0` for an empty
    /// handle.
    pub fn weak_count(&self) -> usize {
        self.counts().map_or(0, Counts::weak)
    }

    /// Creates a new weak handle to the value. Downgrading an empty handle
    /// yields an empty weak handle.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use tether::Strong;
    /// let s = Strong::new(5);
    /// let w = s.downgrade();
    ///
    /// assert!(s.strong_count() == 1);
    /// assert!(s.weak_count() == 1);
    ///
    /// drop(s);
    /// assert!(w.expired());
    /// ```
    pub fn downgrade(&self) -> Weak<T> {
        if let Some(block) = self.block {
            unsafe { (*block.as_ptr()).counts().inc_weak() };
        }

        Weak { block: self.block }
    }

    /// Releases this handle's share of the value and leaves the handle empty.
    /// If it was the last `Strong`, the value is destroyed now; if no weak
    /// handles remain either, the block storage is freed too.
    ///
    /// Dropping the handle does the same thing; `reset` is for keeping the
    /// handle around in its empty state.
    pub fn reset(&mut self) {
        if let Some(block) = self.block.take() {
            self.ptr = ptr::null();
            unsafe { release_strong(block) };
        }
    }

    /// [`reset`][Strong::reset], then re-point the handle at `ptr` the way
    /// [`from_raw`][Strong::from_raw] would.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw`][Strong::from_raw].
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        self.reset();
        *self = Self::from_raw(ptr);
    }

    /// Whether two handles share one control block. Empty handles compare
    /// equal to each other.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        block_eq(self.block, other.block)
    }

    fn counts(&self) -> Option<&Counts> {
        self.block.map(|block| unsafe { (*block.as_ptr()).counts() })
    }
}

pub(crate) fn block_eq<T>(
    a: Option<NonNull<dyn Block<T>>>,
    b: Option<NonNull<dyn Block<T>>>,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.as_ptr() as *const u8 == b.as_ptr() as *const u8,
        (None, None) => true,
        _ => false,
    }
}

impl<T> Clone for Strong<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { (*block.as_ptr()).counts().inc_strong() };
        }

        Strong {
            block: self.block,
            ptr: self.ptr,
        }
    }
}

impl<T> Drop for Strong<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            unsafe { release_strong(block) };
        }
    }
}

impl<T> Default for Strong<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty Strong handle"),
        }
    }
}

impl<T> From<Box<T>> for Strong<T> {
    fn from(b: Box<T>) -> Self {
        Self::from_box(b)
    }
}

impl<T> fmt::Debug for Strong<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("Strong");
        if let Some(value) = self.get() {
            f.field(value);
        }
        f.finish()
    }
}
