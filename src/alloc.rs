use std::{alloc::Layout, fmt, ptr::NonNull, sync::OnceLock};

use crossbeam::channel;
use thiserror::Error;

/// Returned by the `try_` constructors of [`Strong`][crate::Strong] when block
/// storage could not be obtained. No handle is produced and no state is shared;
/// the value (or, for the external-pointer path, the deleter) has already been
/// disposed of when this error is returned.
#[derive(Debug, Error)]
#[error("failed to allocate {size} bytes of control block storage")]
pub struct AllocError {
    pub(crate) size: usize,
}

impl AllocError {
    /// Size in bytes of the allocation that failed.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Provides the backing storage for control blocks.
///
/// Every handle allocation goes through a `BlockAlloc`: the inline path obtains
/// one combined allocation for counters plus value, the external-pointer path
/// obtains storage for the block metadata only. The allocator is moved into the
/// block it allocated and is used again, exactly once, to release that block
/// once the last handle is gone.
///
/// [`Heap`] is the default. [`Pool`] recycles freed blocks. You can implement
/// the trait yourself to place blocks in arena or instrumented memory.
pub trait BlockAlloc {
    /// Allocates storage for `layout`. Returns `None` when storage cannot be
    /// obtained; the caller surfaces that as [`AllocError`].
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases storage previously obtained from [`allocate`][Self::allocate].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this same allocator with
    /// this same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default [`BlockAlloc`]: plain [`std::alloc`] storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct Heap;

impl BlockAlloc for Heap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

struct AllowSend<T>(T);

unsafe impl<T> Send for AllowSend<T> {}

type Slot = AllowSend<(NonNull<u8>, Layout)>;

/// A [`BlockAlloc`] that recycles control block storage.
///
/// Freed blocks are kept in a channel and handed back out for later
/// allocations of the same layout, so repeated create/drop cycles of handles
/// to the same type reuse one heap allocation instead of hitting the global
/// allocator every time. A freed block whose layout does not match the next
/// request is returned to the heap.
///
/// You usually define a `static` pool and hand out `&'static Pool`, which is
/// the type that implements [`BlockAlloc`]:
///
/// ```
/// # use tether::{Pool, Strong};
/// static POOL: Pool = Pool::new();
///
/// let s = Strong::new_in(5, &POOL);
/// assert!(*s == 5);
/// ```
pub struct Pool {
    channel: OnceLock<(channel::Sender<Slot>, channel::Receiver<Slot>)>,
}

impl Pool {
    /// Creates a new, empty pool.
    pub const fn new() -> Self {
        Pool {
            channel: OnceLock::new(),
        }
    }

    fn slots(&self) -> &(channel::Sender<Slot>, channel::Receiver<Slot>) {
        self.channel.get_or_init(channel::unbounded)
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pool")
    }
}

impl BlockAlloc for &'static Pool {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let (_, recv) = self.slots();
        while let Ok(AllowSend((ptr, slot_layout))) = recv.try_recv() {
            if slot_layout == layout {
                return Some(ptr);
            }

            // wrong shape for this request, give it back to the heap
            unsafe { std::alloc::dealloc(ptr.as_ptr(), slot_layout) };
        }

        Heap.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let (send, _) = self.slots();
        let _ = send.send(AllowSend((ptr, layout)));
    }
}
