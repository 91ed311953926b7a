use crate::{AllocError, BlockAlloc, Heap, Pool, Strong, Weak};
use std::{alloc::Layout, cell::Cell, cell::RefCell, mem::drop, ptr::NonNull, rc::Rc};

/// Bumps a counter when dropped.
struct Probe(Rc<Cell<usize>>);

impl Drop for Probe {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

fn counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}

/// Forwards to [`Heap`] while counting calls. `fail` makes `allocate` refuse.
#[derive(Clone, Default)]
struct Counting {
    allocs: Rc<Cell<usize>>,
    frees: Rc<Cell<usize>>,
    fail: bool,
}

impl BlockAlloc for Counting {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if self.fail {
            return None;
        }
        self.allocs.set(self.allocs.get() + 1);
        Heap.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.frees.set(self.frees.get() + 1);
        Heap.deallocate(ptr, layout);
    }
}

#[test]
fn t001() {
    let s = Strong::new(1);
    let w = s.downgrade();

    assert!(*s == 1);
    assert!(s.get() == Some(&1));
    assert!(*w.upgrade().unwrap() == 1);
    drop(s);
    assert!(w.upgrade().is_none());
}

#[test]
fn t002() {
    let a = Strong::new(5);
    assert!(a.strong_count() == 1);

    let b = a.clone();
    let c = b.clone();
    assert!(a.strong_count() == 3);
    assert!(a.ptr_eq(&b) && b.ptr_eq(&c));

    let moved = c;
    assert!(a.strong_count() == 3);

    drop(b);
    assert!(a.strong_count() == 2);

    let mut d = moved;
    d.reset();
    assert!(d.is_empty());
    assert!(d.strong_count() == 0);
    assert!(a.strong_count() == 1);
}

#[test]
fn t003() {
    let drops = counter();

    let a = Strong::new(Probe(Rc::clone(&drops)));
    let b = a.clone();

    drop(a);
    assert!(drops.get() == 0);

    drop(b);
    assert!(drops.get() == 1);
}

#[test]
fn t004() {
    let drops = counter();
    let alloc = Counting::default();

    let s = Strong::new_in(Probe(Rc::clone(&drops)), alloc.clone());
    let w = s.downgrade();
    assert!(alloc.allocs.get() == 1);

    drop(s);
    assert!(drops.get() == 1);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
    assert!(alloc.frees.get() == 0);

    drop(w);
    assert!(alloc.frees.get() == 1);
}

#[test]
fn t005() {
    let s = Strong::new(String::from("a"));
    let w = s.downgrade();
    assert!(s.strong_count() == 1);

    let s2 = w.upgrade().unwrap();
    assert!(s.strong_count() == 2);
    assert!(s.ptr_eq(&s2));

    drop(s2);
    assert!(s.strong_count() == 1);
}

#[test]
fn t006() {
    let hits = counter();

    let ptr = Box::into_raw(Box::new(5));
    let mut s = unsafe {
        let hits = Rc::clone(&hits);
        Strong::from_raw_with(ptr, move |p: *mut i32| {
            hits.set(hits.get() + 1);
            drop(Box::from_raw(p));
        })
    };

    assert!(*s == 5);
    s.reset();
    assert!(hits.get() == 1);
    drop(s);
    assert!(hits.get() == 1);
}

#[test]
fn t007() {
    let drops = counter();

    let s = Strong::from(Box::new(Probe(Rc::clone(&drops))));
    let s2 = s.clone();
    assert!(s.strong_count() == 2);

    drop(s);
    drop(s2);
    assert!(drops.get() == 1);
}

#[test]
fn t008() {
    let drops = counter();

    let a = Strong::new(Probe(Rc::clone(&drops)));
    assert!(a.strong_count() == 1);

    let b = a.clone();
    assert!(a.strong_count() == 2);

    let w = a.downgrade();
    assert!(a.weak_count() == 1);

    drop(a);
    drop(b);
    assert!(drops.get() == 1);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
    assert!(w.weak_count() == 1);

    drop(w);
    assert!(drops.get() == 1);
}

#[test]
fn t009() {
    static POOL: Pool = Pool::new();

    let s = Strong::new_in(5u64, &POOL);
    let addr = s.as_ptr() as usize;
    drop(s);

    let s = Strong::new_in(7u64, &POOL);
    assert!(s.as_ptr() as usize == addr);
    assert!(*s == 7);
}

#[test]
fn t010() {
    let drops = counter();
    let alloc = Counting {
        fail: true,
        ..Counting::default()
    };

    let result = Strong::try_new_in(Probe(Rc::clone(&drops)), alloc.clone());
    assert!(result.is_err());
    assert!(drops.get() == 1);
    assert!(alloc.allocs.get() == 0);
    assert!(alloc.frees.get() == 0);
}

#[test]
fn t011() {
    let s = Strong::<i32>::empty();
    assert!(s.is_empty());
    assert!(s.strong_count() == 0);
    assert!(s.weak_count() == 0);
    assert!(s.get().is_none());
    assert!(s.as_ptr().is_null());
    assert!(s.ptr_eq(&Strong::default()));

    let w = s.downgrade();
    assert!(w.expired());
    assert!(w.upgrade().is_none());
    assert!(w.ptr_eq(&Weak::empty()));
}

#[test]
#[should_panic]
fn t012() {
    let s = Strong::<i32>::empty();
    let _ = *s;
}

#[test]
fn t013() {
    let hits = counter();
    let alloc = Counting::default();

    let ptr = Box::into_raw(Box::new(5));
    let mut s = unsafe {
        let hits = Rc::clone(&hits);
        Strong::from_raw_parts(
            ptr,
            move |p: *mut i32| {
                hits.set(hits.get() + 1);
                drop(Box::from_raw(p));
            },
            alloc.clone(),
        )
    };

    assert!(alloc.allocs.get() == 1);
    s.reset();
    assert!(hits.get() == 1);
    assert!(alloc.frees.get() == 1);
}

#[test]
fn t014() {
    let s = Strong::new(1);

    let w1 = Weak::new(&s);
    let w2 = w1.clone();
    let w3 = Weak::from(&s);
    assert!(s.weak_count() == 3);
    assert!(w1.weak_count() == 3);

    drop(w2);
    assert!(s.weak_count() == 2);

    let mut w3 = w3;
    w3.reset();
    assert!(s.weak_count() == 1);
    assert!(w3.upgrade().is_none());

    assert!(w1.strong_count() == 1);
    assert!(!w1.expired());
}

#[test]
fn t015() {
    let first = counter();
    let second = counter();

    let mut s = unsafe { Strong::from_raw(Box::into_raw(Box::new(Probe(Rc::clone(&first))))) };
    unsafe { s.reset_raw(Box::into_raw(Box::new(Probe(Rc::clone(&second))))) };

    assert!(first.get() == 1);
    assert!(second.get() == 0);

    drop(s);
    assert!(second.get() == 1);
}

#[test]
fn t016() {
    let hits = counter();
    let alloc = Counting {
        fail: true,
        ..Counting::default()
    };

    let ptr = Box::into_raw(Box::new(5));
    let result: Result<Strong<i32>, AllocError> = unsafe {
        let hits = Rc::clone(&hits);
        Strong::try_from_raw_parts(
            ptr,
            move |p: *mut i32| {
                hits.set(hits.get() + 1);
                drop(Box::from_raw(p));
            },
            alloc,
        )
    };

    assert!(result.is_err());
    assert!(hits.get() == 1);
    assert!(result.unwrap_err().size() > 0);
}

#[test]
fn t017() {
    // an upgrade taken out before the original owner went away must keep the
    // value alive on its own
    let s = Strong::new(1);
    let w = s.downgrade();

    let held = w.upgrade().unwrap();
    drop(s);
    assert!(!w.expired());
    assert!(w.strong_count() == 1);

    drop(held);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
}

#[test]
fn t018() {
    // a value holding the last weak handle to its own block: the weak is
    // dropped from inside the value's destructor, and the block must still be
    // freed exactly once
    struct Node {
        this: RefCell<Weak<Node>>,
        _probe: Probe,
    }

    let drops = counter();
    let alloc = Counting::default();

    let s = Strong::new_in(
        Node {
            this: RefCell::new(Weak::empty()),
            _probe: Probe(Rc::clone(&drops)),
        },
        alloc.clone(),
    );
    *s.this.borrow_mut() = s.downgrade();
    assert!(s.weak_count() == 1);
    assert!(s.this.borrow().upgrade().is_some());

    drop(s);
    assert!(drops.get() == 1);
    assert!(alloc.allocs.get() == 1);
    assert!(alloc.frees.get() == 1);
}
