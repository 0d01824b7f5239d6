// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use cgc::{Collector, Destructor, Flags};
use std::cell::Cell;

thread_local! {
    static DTOR_CALLS: Cell<usize> = Cell::new(0);
}

fn reset_dtor_calls() {
    DTOR_CALLS.with(|c| c.set(0));
}

fn dtor_calls() -> usize {
    DTOR_CALLS.with(|c| c.get())
}

fn bump_dtor(_ptr: *mut u8) {
    DTOR_CALLS.with(|c| c.set(c.get() + 1));
}

const BUMP: Destructor = bump_dtor;

#[inline(never)]
fn allocate_and_forget(gc: &mut Collector) {
    let p = gc
        .allocate_opt(64, Flags::empty(), Some(BUMP))
        .expect("allocation should succeed");
    unsafe {
        std::ptr::copy_nonoverlapping(b"hello, world".as_ptr(), p.as_ptr(), 12);
    }
    // `p` deliberately goes out of scope here with no copy retained anywhere
    // the caller can see.
}

#[test]
fn leak_free_allocation_in_nested_frame_is_collected_exactly_once() {
    reset_dtor_calls();
    let mut gc = Collector::new(cgc::stack_hint!());

    allocate_and_forget(&mut gc);
    gc.run();

    assert_eq!(dtor_calls(), 1);
}

// `b`'s address must not sit in a stack slot of the test frame itself, or a
// conservative scan would root it directly from the stack regardless of
// `a`'s body; isolating the allocation of `b` in a frame that returns
// before `run()` ensures only `a`'s chain can keep it alive.
#[inline(never)]
fn allocate_chained(gc: &mut Collector, a_flags: Flags) -> std::ptr::NonNull<u8> {
    let b = gc.allocate_opt(64, Flags::empty(), Some(BUMP)).unwrap();
    let a = gc.allocate_opt(64, a_flags, None).unwrap();
    unsafe { *(a.as_ptr() as *mut usize) = b.as_ptr() as usize };
    a
}

#[test]
fn reachable_via_heap_chain_retains_both_ends() {
    reset_dtor_calls();
    let mut gc = Collector::new(cgc::stack_hint!());

    let a = allocate_chained(&mut gc, Flags::empty());

    gc.run();

    // `a` is still a live local (used below), so it occupied a scanned
    // stack slot throughout `run`; `b` is only reachable through `a`'s body.
    assert!(gc.reallocate(Some(a), 64).is_some(), "a must survive");
    assert_eq!(dtor_calls(), 0, "b must survive transitively through a's body");
}

#[test]
fn leaf_flag_stops_trace_into_body_and_lets_the_referent_be_freed() {
    reset_dtor_calls();
    let mut gc = Collector::new(cgc::stack_hint!());

    let a = allocate_chained(&mut gc, Flags::LEAF);

    gc.run();

    assert!(gc.reallocate(Some(a), 64).is_some(), "a must survive via the stack");
    assert_eq!(dtor_calls(), 1, "b must be freed since a's body is opaque");
}

#[test]
fn root_flag_survives_without_any_stack_reference_and_free_runs_destructor() {
    reset_dtor_calls();
    let mut gc = Collector::new(cgc::stack_hint!());

    let r = gc.allocate_opt(32, Flags::ROOT, Some(BUMP)).unwrap();

    gc.run();
    assert_eq!(dtor_calls(), 0, "root must not be swept");

    gc.free(Some(r));
    assert_eq!(dtor_calls(), 1, "explicit free must still invoke the destructor");
}

thread_local! {
    static REENTRANT_GC: Cell<*mut Collector> = Cell::new(std::ptr::null_mut());
    static REENTRANT_ALLOC_OK: Cell<bool> = Cell::new(false);
}

fn allocate_from_destructor(_ptr: *mut u8) {
    let raw = REENTRANT_GC.with(|c| c.get());
    if let Some(gc) = unsafe { raw.as_mut() } {
        let ok = gc.allocate(8).is_some();
        REENTRANT_ALLOC_OK.with(|c| c.set(ok));
    }
    bump_dtor(_ptr);
}

#[test]
fn destructor_that_allocates_does_not_corrupt_the_registry() {
    reset_dtor_calls();
    REENTRANT_ALLOC_OK.with(|c| c.set(false));

    let mut gc = Collector::new(cgc::stack_hint!());
    REENTRANT_GC.with(|c| c.set(&mut gc as *mut Collector));

    let _ = gc.allocate_opt(16, Flags::empty(), Some(allocate_from_destructor as Destructor));
    gc.run();

    REENTRANT_GC.with(|c| c.set(std::ptr::null_mut()));

    assert_eq!(dtor_calls(), 1);
    assert!(REENTRANT_ALLOC_OK.with(|c| c.get()), "reentrant allocate from within a destructor must succeed");
}

#[test]
fn reallocate_migrates_the_entry_and_preserves_flags_and_destructor() {
    reset_dtor_calls();
    let mut gc = Collector::new(cgc::stack_hint!());

    let p = gc.allocate_opt(16, Flags::ROOT, Some(BUMP)).unwrap();
    let old_addr = p.as_ptr() as usize;

    let q = gc.reallocate(Some(p), 1 << 20).expect("reallocate should succeed");

    assert_ne!(q.as_ptr() as usize, old_addr, "a 1MB grow should force a move");
    assert_eq!(gc.get_flags(q), Flags::ROOT);

    gc.free(Some(q));
    assert_eq!(dtor_calls(), 1);
}

#[test]
fn stop_frees_every_non_root_allocation_and_leaves_roots_allocated() {
    reset_dtor_calls();
    let mut gc = Collector::new(cgc::stack_hint!());

    let _plain = gc.allocate_opt(16, Flags::empty(), Some(BUMP)).unwrap();
    let root = gc.allocate_opt(16, Flags::ROOT, Some(BUMP)).unwrap();

    gc.stop();

    assert_eq!(dtor_calls(), 1, "only the non-root allocation's destructor runs");

    // `root` was deliberately left allocated by `stop`, so freeing it
    // through the raw allocator directly (bypassing the now-dropped
    // collector) is the caller's responsibility; here we just confirm its
    // destructor did not also fire.
    unsafe {
        std::alloc::dealloc(root.as_ptr(), std::alloc::Layout::from_size_align(16, 8).unwrap());
    }
}

#[test]
fn drop_runs_stop_automatically_if_never_called_explicitly() {
    reset_dtor_calls();
    {
        let mut gc = Collector::new(cgc::stack_hint!());
        let _ = gc.allocate_opt(16, Flags::empty(), Some(BUMP));
    }
    assert_eq!(dtor_calls(), 1, "dropping the collector without an explicit stop() still sweeps");
}

#[test]
fn boundary_behaviors() {
    let mut gc = Collector::new(cgc::stack_hint!());

    let zero = gc.allocate(0).expect("zero-size allocation must succeed");
    assert!(gc.reallocate(Some(zero), 8).is_some());

    assert!(gc.callocate(usize::MAX, 2).is_none(), "overflowing callocate must fail");

    gc.free(None); // no-op, must not panic

    let via_none = gc.reallocate(None, 32);
    assert!(via_none.is_some(), "reallocate(None, n) behaves as allocate(n)");

    let bogus = std::ptr::NonNull::new(0x1 as *mut u8).unwrap();
    assert!(gc.reallocate(Some(bogus), 8).is_none(), "unknown pointer reallocate fails");
}
