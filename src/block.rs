use std::{
    alloc::Layout, cell::Cell, cell::UnsafeCell, mem::ManuallyDrop, ptr, ptr::NonNull,
};

use crate::alloc::BlockAlloc;

/// The bookkeeping every control block carries. The value is alive while
/// `strong > 0`; the block's own storage stays while `weak > 0`.
///
/// The strong handles collectively hold one weak reference, released after
/// the value is destroyed. The block is therefore freed by exactly one path:
/// whichever release drops `weak` to zero.
pub(crate) struct Counts {
    strong: Cell<usize>,
    weak: Cell<usize>,
}

impl Counts {
    fn new() -> Self {
        Counts {
            strong: Cell::new(1),
            weak: Cell::new(1),
        }
    }

    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    /// Number of weak handles, not counting the reference the strong set
    /// holds while the value is alive.
    pub(crate) fn weak(&self) -> usize {
        if self.strong.get() > 0 {
            self.weak.get() - 1
        } else {
            self.weak.get()
        }
    }

    pub(crate) fn inc_strong(&self) {
        self.strong.set(self.strong.get() + 1);
    }

    /// Returns the new count.
    pub(crate) fn dec_strong(&self) -> usize {
        debug_assert!(self.strong.get() > 0);
        let n = self.strong.get() - 1;
        self.strong.set(n);
        n
    }

    pub(crate) fn inc_weak(&self) {
        self.weak.set(self.weak.get() + 1);
    }

    /// Returns the new count.
    pub(crate) fn dec_weak(&self) -> usize {
        debug_assert!(self.weak.get() > 0);
        let n = self.weak.get() - 1;
        self.weak.set(n);
        n
    }
}

/// The erased face of a control block. Handles hold `NonNull<dyn Block<T>>`
/// and never learn the concrete block, deleter, or allocator type behind it.
pub(crate) trait Block<T> {
    fn counts(&self) -> &Counts;

    /// Address of the managed value.
    fn get(&self) -> NonNull<T>;

    /// Runs the managed value's destructor, or the stored deleter.
    ///
    /// # Safety
    ///
    /// Must be called exactly once per block, and only once the strong count
    /// has reached zero.
    unsafe fn destroy(&self);

    /// Releases the block's own storage through the allocator it was built
    /// with. The block must not be touched afterwards.
    ///
    /// # Safety
    ///
    /// Must be called exactly once per block, and only once both counts have
    /// reached zero and [`destroy`][Self::destroy] has already run.
    unsafe fn dealloc(&self);
}

/// Drops one strong reference. The last one destroys the value, then hands
/// the strong set's weak reference to [`release_weak`]; the value's own
/// destructor may drop further weak handles to this block before that
/// happens, and the block stays allocated throughout. Shared by
/// `Strong::reset` and `Strong::drop`.
///
/// # Safety
///
/// `block` must carry a strong reference owned by the caller, which is
/// consumed here. The caller must not use `block` afterwards.
pub(crate) unsafe fn release_strong<T>(block: NonNull<dyn Block<T>>) {
    let b = &*block.as_ptr();

    if b.counts().dec_strong() == 0 {
        b.destroy();
        release_weak(block);
    }
}

/// Drops one weak reference. The last one frees the block. Shared by
/// `Weak::reset` and `Weak::drop`.
///
/// # Safety
///
/// `block` must carry a weak reference owned by the caller, which is consumed
/// here. The caller must not use `block` afterwards.
pub(crate) unsafe fn release_weak<T>(block: NonNull<dyn Block<T>>) {
    let b = &*block.as_ptr();

    if b.counts().dec_weak() == 0 {
        b.dealloc();
    }
}

/// Control block with the value stored inside the block allocation itself:
/// one allocation covers counters, allocator, and value.
pub(crate) struct InlineBlock<T, A>
where
    A: BlockAlloc,
{
    counts: Counts,
    alloc: ManuallyDrop<A>,
    value: UnsafeCell<ManuallyDrop<T>>,
}

impl<T, A> InlineBlock<T, A>
where
    A: BlockAlloc,
{
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Writes a fresh block (`strong = 1, weak = 0`) into `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be valid storage for [`Self::layout`].
    pub(crate) unsafe fn init(raw: NonNull<u8>, value: T, alloc: A) -> NonNull<Self> {
        let block = raw.as_ptr() as *mut Self;
        ptr::write(
            block,
            InlineBlock {
                counts: Counts::new(),
                alloc: ManuallyDrop::new(alloc),
                value: UnsafeCell::new(ManuallyDrop::new(value)),
            },
        );

        NonNull::new_unchecked(block)
    }
}

impl<T, A> Block<T> for InlineBlock<T, A>
where
    A: BlockAlloc,
{
    fn counts(&self) -> &Counts {
        &self.counts
    }

    fn get(&self) -> NonNull<T> {
        unsafe { NonNull::new_unchecked(self.value.get() as *mut T) }
    }

    unsafe fn destroy(&self) {
        ManuallyDrop::drop(&mut *self.value.get());
    }

    unsafe fn dealloc(&self) {
        let this = NonNull::new_unchecked(self as *const Self as *mut u8);
        let alloc = ManuallyDrop::into_inner(ptr::read(&self.alloc));
        alloc.deallocate(this, Layout::new::<Self>());
    }
}

/// Control block over a value that was allocated elsewhere. Stores the value
/// pointer, the deleter that will tear the value down, and the allocator used
/// for this block's own metadata storage only.
pub(crate) struct PointerBlock<T, D, A>
where
    D: FnOnce(*mut T),
    A: BlockAlloc,
{
    counts: Counts,
    ptr: NonNull<T>,
    deleter: UnsafeCell<ManuallyDrop<D>>,
    alloc: ManuallyDrop<A>,
}

impl<T, D, A> PointerBlock<T, D, A>
where
    D: FnOnce(*mut T),
    A: BlockAlloc,
{
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Writes a fresh block (`strong = 1, weak = 0`) into `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be valid storage for [`Self::layout`].
    pub(crate) unsafe fn init(
        raw: NonNull<u8>,
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> NonNull<Self> {
        let block = raw.as_ptr() as *mut Self;
        ptr::write(
            block,
            PointerBlock {
                counts: Counts::new(),
                ptr,
                deleter: UnsafeCell::new(ManuallyDrop::new(deleter)),
                alloc: ManuallyDrop::new(alloc),
            },
        );

        NonNull::new_unchecked(block)
    }
}

impl<T, D, A> Block<T> for PointerBlock<T, D, A>
where
    D: FnOnce(*mut T),
    A: BlockAlloc,
{
    fn counts(&self) -> &Counts {
        &self.counts
    }

    fn get(&self) -> NonNull<T> {
        self.ptr
    }

    unsafe fn destroy(&self) {
        let deleter = ManuallyDrop::take(&mut *self.deleter.get());
        deleter(self.ptr.as_ptr());
    }

    unsafe fn dealloc(&self) {
        let this = NonNull::new_unchecked(self as *const Self as *mut u8);
        let alloc = ManuallyDrop::into_inner(ptr::read(&self.alloc));
        alloc.deallocate(this, Layout::new::<Self>());
    }
}
