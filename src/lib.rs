//! Reference counted [`Strong`] and [`Weak`] handles over a single heap value.
//!
//! The provided `Strong` and `Weak` handle types are close relatives of
//! [`std::rc::Rc`] and [`std::rc::Weak`]. The key difference is that the
//! bookkeeping lives in a control block reached through an erased interface,
//! so one pair of handle types covers two storage strategies: [`Strong::new`]
//! places the value inside the control block's own allocation (one allocation
//! for value plus counters), while the [`Strong::from_raw`] family adopts a
//! value that was allocated elsewhere and pairs it with a deleter that will
//! run in place of the ordinary destructor. In both cases the block's own
//! storage comes from a [`BlockAlloc`], so the bookkeeping can live in
//! recycled ([`Pool`]) or otherwise customized memory.
//!
//! The value is destroyed when the last `Strong` is released. Weak handles
//! never delay that; they only keep the counters around, so
//! [`Weak::expired`] and [`Weak::upgrade`] stay answerable after the value is
//! gone. The block storage itself is freed once the last handle of either
//! kind is released.
//!
//! Counters are plain cells and every operation is synchronous: the handle
//! types are neither [`Send`] nor [`Sync`]. Reference cycles through `Strong`
//! handles are not detected and will leak; break them with `Weak`.

mod alloc;
mod block;
mod strong;
mod weak;

pub use crate::alloc::{AllocError, BlockAlloc, Heap, Pool};
pub use crate::strong::Strong;
pub use crate::weak::Weak;

#[cfg(test)]
mod test;
