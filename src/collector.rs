// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{
    alloc::{layout_for, RawAllocator, SystemAllocator},
    debug_flags::DebugFlags,
    error::GcError,
    flags::Flags,
    mark::mark,
    registry::Registry,
    stack::StackBounds,
    sweep::sweep,
    tunables::Tunables,
    Destructor,
};
use std::ptr::NonNull;

/// A conservative, thread-local, mark-and-sweep garbage collector.
///
/// A `Collector` is an ordinary value: it is not a hidden global, and the
/// caller decides its lifetime and which thread it is used from (it is
/// `!Send`/`!Sync` because it holds raw allocation pointers and
/// thread-affine stack bounds). Construct it with the address of a
/// stack-local from the outermost frame that should be considered live;
/// in practice, `Collector::new(stack_hint!())` called once near the top
/// of the host program.
pub struct Collector<A: RawAllocator = SystemAllocator> {
    allocator: A,
    registry: Registry,
    stack_bounds: StackBounds,
    static_ranges: Vec<(usize, usize)>,
    paused: bool,
    stopped: bool,
    debug_flags: DebugFlags,
    tunables: Tunables,
    threshold: usize,
}

impl Collector<SystemAllocator> {
    /// Starts a collector backed by the system allocator with default
    /// tunables.
    pub fn new(stack_hint: usize) -> Self {
        Self::with_allocator_and_tunables(stack_hint, SystemAllocator, Tunables::default())
    }

    /// Starts a collector backed by the system allocator with custom
    /// tunables.
    pub fn with_tunables(stack_hint: usize, tunables: Tunables) -> Self {
        Self::with_allocator_and_tunables(stack_hint, SystemAllocator, tunables)
    }
}

impl<A: RawAllocator> Collector<A> {
    /// Starts a collector backed by a custom [`RawAllocator`] with default
    /// tunables. Chiefly useful for tests that want to exercise the
    /// out-of-memory retry path without exhausting real process memory.
    pub fn with_allocator(stack_hint: usize, allocator: A) -> Self {
        Self::with_allocator_and_tunables(stack_hint, allocator, Tunables::default())
    }

    /// Starts a collector backed by a custom [`RawAllocator`] and
    /// [`Tunables`].
    pub fn with_allocator_and_tunables(stack_hint: usize, allocator: A, tunables: Tunables) -> Self {
        let threshold = tunables.initial_threshold;
        Self {
            allocator,
            registry: Registry::new(&tunables),
            stack_bounds: StackBounds::new(stack_hint),
            static_ranges: Vec::new(),
            paused: false,
            stopped: false,
            debug_flags: DebugFlags::new(),
            tunables,
            threshold,
        }
    }

    /// Overrides which phases `run` performs. Chiefly useful for tests
    /// that want to isolate mark-only or sweep-only behaviour.
    pub fn set_debug_flags(&mut self, flags: DebugFlags) {
        self.debug_flags = flags;
    }

    /// Enrolls an additional `[lo, hi)` address range to be scanned as
    /// roots, for ecosystems where top-level globals hold managed
    /// pointers. Absent any enrollment, pointers stored only in static
    /// memory are not roots.
    pub fn register_static_range(&mut self, lo: usize, hi: usize) {
        self.static_ranges.push((lo, hi));
    }

    /// Disables automatic collection on allocation. `run` still works
    /// while paused.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Re-enables automatic collection on allocation.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Performs a full mark-then-sweep collection immediately, honoring
    /// whichever phases `set_debug_flags` last enabled.
    pub fn run(&mut self) {
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "cgc::collector",
            occupied = self.registry.occupied(),
            capacity = self.registry.capacity(),
            "collection starting"
        );

        if self.debug_flags.mark_phase {
            mark(&mut self.registry, &self.stack_bounds, &self.static_ranges);
        }

        if self.debug_flags.sweep_phase {
            let stats = sweep(&mut self.registry, &self.allocator, &mut self.paused);
            self.threshold = next_threshold(&self.tunables, stats.occupied_after);

            #[cfg(feature = "gc_logging")]
            tracing::info!(
                target: "cgc::collector",
                freed = stats.freed,
                occupied = stats.occupied_after,
                next_threshold = self.threshold,
                "collection finished"
            );
        }
    }

    fn maybe_collect(&mut self) {
        if !self.paused && self.registry.occupied() >= self.threshold {
            self.run();
        }
    }

    /// Allocates `n` bytes with no flags and no destructor. `n == 0` is
    /// accepted and returns a valid, distinct, freeable pointer.
    pub fn allocate(&mut self, n: usize) -> Option<NonNull<u8>> {
        self.try_allocate(n).ok()
    }

    pub fn try_allocate(&mut self, n: usize) -> Result<NonNull<u8>, GcError> {
        self.try_allocate_opt(n, Flags::empty(), None)
    }

    /// Allocates `n` bytes with the given flags and optional destructor.
    pub fn allocate_opt(&mut self, n: usize, flags: Flags, dtor: Option<Destructor>) -> Option<NonNull<u8>> {
        self.try_allocate_opt(n, flags, dtor).ok()
    }

    pub fn try_allocate_opt(
        &mut self,
        n: usize,
        flags: Flags,
        dtor: Option<Destructor>,
    ) -> Result<NonNull<u8>, GcError> {
        let layout = layout_for(n);
        let ptr = match self.allocator.allocate(layout) {
            Some(p) => p,
            None => {
                // Force a collection and retry exactly once.
                self.run();
                self.allocator.allocate(layout).ok_or(GcError::OutOfMemory)?
            }
        };
        self.registry.insert(ptr, layout.size(), flags.user_bits(), dtor);
        self.maybe_collect();
        Ok(ptr)
    }

    /// Allocates zeroed storage for `num` elements of `size` bytes each.
    /// Fails with `None` if `num * size` would overflow `usize`.
    pub fn callocate(&mut self, num: usize, size: usize) -> Option<NonNull<u8>> {
        self.try_callocate(num, size).ok()
    }

    pub fn try_callocate(&mut self, num: usize, size: usize) -> Result<NonNull<u8>, GcError> {
        self.try_callocate_opt(num, size, Flags::empty(), None)
    }

    pub fn callocate_opt(
        &mut self,
        num: usize,
        size: usize,
        flags: Flags,
        dtor: Option<Destructor>,
    ) -> Option<NonNull<u8>> {
        self.try_callocate_opt(num, size, flags, dtor).ok()
    }

    pub fn try_callocate_opt(
        &mut self,
        num: usize,
        size: usize,
        flags: Flags,
        dtor: Option<Destructor>,
    ) -> Result<NonNull<u8>, GcError> {
        let total = num.checked_mul(size).ok_or(GcError::SizeOverflow)?;
        let layout = layout_for(total);
        let ptr = match self.allocator.allocate_zeroed(layout) {
            Some(p) => p,
            None => {
                self.run();
                self.allocator.allocate_zeroed(layout).ok_or(GcError::OutOfMemory)?
            }
        };
        self.registry.insert(ptr, layout.size(), flags.user_bits(), dtor);
        self.maybe_collect();
        Ok(ptr)
    }

    /// `None` behaves as `allocate(n)`. An unknown, non-`None` pointer
    /// returns `None` (the collector does not know the original layout
    /// needed to hand it back to the system allocator).
    pub fn reallocate(&mut self, ptr: Option<NonNull<u8>>, n: usize) -> Option<NonNull<u8>> {
        let old = match ptr {
            None => return self.allocate(n),
            Some(p) => p,
        };

        let addr = old.as_ptr() as usize;
        let (old_layout, flags, dtor) = {
            let entry = self.registry.lookup(addr)?;
            (layout_for(entry.size), entry.flags, entry.dtor)
        };

        let new_layout = layout_for(n);
        // SAFETY: `old` was looked up in the registry with the layout it
        // was allocated/last reallocated with.
        let new_ptr = unsafe { self.allocator.reallocate(old, old_layout, new_layout.size()) }?;

        self.registry.remove(addr);
        self.registry.insert(new_ptr, new_layout.size(), flags, dtor);
        Some(new_ptr)
    }

    /// `None` is a no-op. An unknown pointer is ignored.
    pub fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let ptr = match ptr {
            None => return,
            Some(p) => p,
        };
        if let Some(entry) = self.registry.remove(ptr.as_ptr() as usize) {
            if let Some(dtor) = entry.dtor {
                dtor(entry.ptr.as_ptr());
            }
            // SAFETY: just removed from the registry, so this is the last
            // reference to it.
            unsafe { self.allocator.free(entry.ptr, layout_for(entry.size)) };
        }
    }

    /// Returns the destructor registered for `ptr`, or `None` if `ptr` is
    /// unknown.
    pub fn get_dtor(&self, ptr: NonNull<u8>) -> Option<Destructor> {
        self.registry.lookup(ptr.as_ptr() as usize)?.dtor
    }

    /// Sets (or clears, with `None`) the destructor for `ptr`. A no-op if
    /// `ptr` is unknown.
    pub fn set_dtor(&mut self, ptr: NonNull<u8>, dtor: Option<Destructor>) {
        if let Some(entry) = self.registry.lookup_mut(ptr.as_ptr() as usize) {
            entry.dtor = dtor;
        }
    }

    /// Returns the public flags (`ROOT`/`LEAF`) set on `ptr`, or empty
    /// flags if `ptr` is unknown.
    pub fn get_flags(&self, ptr: NonNull<u8>) -> Flags {
        self.registry
            .lookup(ptr.as_ptr() as usize)
            .map(|e| e.flags.user_bits())
            .unwrap_or_else(Flags::empty)
    }

    /// Sets the public flags (`ROOT`/`LEAF`) on `ptr`, preserving the
    /// internal `MARK` bit. A no-op if `ptr` is unknown. Any `MARK` bit in
    /// `flags` is silently ignored.
    pub fn set_flags(&mut self, ptr: NonNull<u8>, flags: Flags) {
        if let Some(entry) = self.registry.lookup_mut(ptr.as_ptr() as usize) {
            let mark = entry.flags & Flags::MARK;
            entry.flags = flags.user_bits() | mark;
        }
    }

    fn do_stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        // Nothing is marked, so a sweep frees every non-root entry,
        // running destructors; roots are left for the caller to free
        // explicitly.
        sweep(&mut self.registry, &self.allocator, &mut self.paused);
    }

    /// Frees every non-root allocation (destructors included) and drops
    /// the registry storage. Root entries are left allocated; free them
    /// explicitly first if that's desired. Also runs automatically from
    /// `Drop` if never called explicitly.
    pub fn stop(mut self) {
        self.do_stop();
    }
}

impl<A: RawAllocator> Drop for Collector<A> {
    fn drop(&mut self) {
        self.do_stop();
    }
}

fn next_threshold(tunables: &Tunables, occupied_after: usize) -> usize {
    let grown = (occupied_after as f64 * tunables.growth_factor) as usize;
    grown.max(tunables.initial_threshold)
}
