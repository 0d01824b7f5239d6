// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{alloc::layout_for, alloc::RawAllocator, flags::Flags, registry::Registry, Destructor};
use std::ptr::NonNull;

/// A pointer scheduled for deallocation, carrying everything its
/// destructor and the raw allocator need, captured at removal time so the
/// registry never needs to be touched again once step 2 below completes.
struct FreeJob {
    ptr: NonNull<u8>,
    size: usize,
    dtor: Option<Destructor>,
}

/// Outcome of one sweep, used to recompute the next collection threshold
/// and for diagnostics.
pub(crate) struct SweepStats {
    pub(crate) freed: usize,
    pub(crate) occupied_after: usize,
}

/// Frees every unmarked non-root entry, running its destructor first, then
/// clears `MARK` on every survivor so the next mark phase starts clean.
///
/// The pass is split into three stages precisely because destructors may
/// themselves call back into the collector: (1) a read-only scan collects
/// the doomed pointers without mutating the Robin-Hood probe chains, (2)
/// each doomed entry is removed from the registry, bringing it back to a
/// self-consistent state, and only then (3) are destructors invoked and
/// the memory actually released. Destructors must not assume any
/// ordering between frees of different objects in the same sweep.
pub(crate) fn sweep<A: RawAllocator>(registry: &mut Registry, allocator: &A, paused: &mut bool) -> SweepStats {
    // Forced for the whole pass, not just the rehash below: a destructor
    // may allocate, and that allocation must not trigger a nested
    // collection while this one is still unwinding its frees buffer.
    // Restoring the caller's prior value (rather than unconditionally
    // clearing it) keeps this composable if sweep is ever invoked while
    // already paused for some outer reason.
    let was_paused = *paused;
    *paused = true;

    let doomed: Vec<usize> = registry
        .iter()
        .filter(|e| !e.flags.contains(Flags::ROOT) && !e.flags.contains(Flags::MARK))
        .map(|e| e.ptr.as_ptr() as usize)
        .collect();

    let mut jobs = Vec::with_capacity(doomed.len());
    for addr in doomed {
        if let Some(entry) = registry.remove(addr) {
            jobs.push(FreeJob {
                ptr: entry.ptr,
                size: entry.size,
                dtor: entry.dtor,
            });
        }
    }

    registry.maybe_shrink();

    let freed = jobs.len();
    for job in jobs {
        if let Some(dtor) = job.dtor {
            dtor(job.ptr.as_ptr());
        }
        // SAFETY: `job.ptr` was just removed from the registry, so this is
        // the only place that can still reach it; `job.size` is the exact
        // size it was allocated (or last reallocated) with.
        unsafe { allocator.free(job.ptr, layout_for(job.size)) };
    }

    for entry in registry.iter_mut() {
        entry.flags.remove(Flags::MARK);
    }

    *paused = was_paused;

    SweepStats {
        freed,
        occupied_after: registry.occupied(),
    }
}
