// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{flags::Flags, hash::hash_ptr, tunables::Tunables, Destructor};
use std::ptr::NonNull;

/// A single managed allocation's metadata, keyed by its start address.
#[derive(Clone, Copy)]
pub(crate) struct Entry {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) size: usize,
    pub(crate) hash: u64,
    pub(crate) flags: Flags,
    pub(crate) probe: u32,
    pub(crate) dtor: Option<Destructor>,
}

impl Entry {
    fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

/// Open-addressing hash table mapping allocation-start addresses to
/// [`Entry`] metadata, using Robin-Hood probe-distance balancing and
/// backward-shift deletion (no tombstones are ever retained).
pub(crate) struct Registry {
    slots: Vec<Option<Entry>>,
    capacity: usize,
    occupied: usize,
    load_factor: f64,
    sweep_factor: f64,
    min_capacity: usize,
}

impl Registry {
    pub(crate) fn new(tunables: &Tunables) -> Self {
        let capacity = tunables.min_capacity.max(1).next_power_of_two();
        Self {
            slots: vec![None; capacity],
            capacity,
            occupied: 0,
            load_factor: tunables.load_factor,
            sweep_factor: tunables.sweep_factor,
            min_capacity: capacity,
        }
    }

    pub(crate) fn occupied(&self) -> usize {
        self.occupied
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn ideal_slot(&self, hash: u64) -> usize {
        (hash as usize) & (self.capacity - 1)
    }

    /// Inserts a freshly-allocated pointer. Grows the table afterwards if
    /// occupancy now exceeds `load_factor`.
    pub(crate) fn insert(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        flags: Flags,
        dtor: Option<Destructor>,
    ) {
        let hash = hash_ptr(ptr.as_ptr() as usize);
        self.insert_entry(Entry {
            ptr,
            size,
            hash,
            flags,
            probe: 0,
            dtor,
        });
        if self.occupied as f64 > self.capacity as f64 * self.load_factor {
            self.rehash(self.capacity * 2);
        }
    }

    /// Robin-Hood insertion without the post-insert growth check, used
    /// both by `insert` and by `rehash` (which must not recursively grow).
    fn insert_entry(&mut self, mut entry: Entry) {
        let mut idx = self.ideal_slot(entry.hash);
        loop {
            match self.slots[idx] {
                None => {
                    self.slots[idx] = Some(entry);
                    break;
                }
                Some(ref mut occupant) => {
                    if occupant.probe < entry.probe {
                        std::mem::swap(occupant, &mut entry);
                    }
                }
            }
            entry.probe += 1;
            idx = (idx + 1) & (self.capacity - 1);
        }
        self.occupied += 1;
    }

    pub(crate) fn lookup(&self, addr: usize) -> Option<&Entry> {
        let hash = hash_ptr(addr);
        let mut idx = self.ideal_slot(hash);
        let mut steps = 0u32;
        loop {
            match &self.slots[idx] {
                None => return None,
                Some(e) => {
                    if e.hash == hash && e.addr() == addr {
                        return Some(e);
                    }
                    if e.probe < steps {
                        return None;
                    }
                }
            }
            idx = (idx + 1) & (self.capacity - 1);
            steps += 1;
        }
    }

    pub(crate) fn lookup_mut(&mut self, addr: usize) -> Option<&mut Entry> {
        let hash = hash_ptr(addr);
        let mut idx = self.ideal_slot(hash);
        let mut steps = 0u32;
        loop {
            match self.slots[idx] {
                None => return None,
                Some(ref e) => {
                    if e.hash == hash && e.addr() == addr {
                        break;
                    }
                    if e.probe < steps {
                        return None;
                    }
                }
            }
            idx = (idx + 1) & (self.capacity - 1);
            steps += 1;
        }
        self.slots[idx].as_mut()
    }

    /// Removes the entry for `addr`, if any, backward-shifting the probe
    /// chain behind it so no tombstone is left.
    pub(crate) fn remove(&mut self, addr: usize) -> Option<Entry> {
        let hash = hash_ptr(addr);
        let mut idx = self.ideal_slot(hash);
        let mut steps = 0u32;
        let found = loop {
            match &self.slots[idx] {
                None => return None,
                Some(e) => {
                    if e.hash == hash && e.addr() == addr {
                        break idx;
                    }
                    if e.probe < steps {
                        return None;
                    }
                }
            }
            idx = (idx + 1) & (self.capacity - 1);
            steps += 1;
        };

        let removed = self.slots[found].take();
        let mut hole = found;
        loop {
            let next = (hole + 1) & (self.capacity - 1);
            let shift = matches!(self.slots[next], Some(e) if e.probe > 0);
            if !shift {
                break;
            }
            let mut moved = self.slots[next].take().unwrap();
            moved.probe -= 1;
            self.slots[hole] = Some(moved);
            hole = next;
        }
        self.occupied -= 1;
        removed
    }

    /// Reallocates the slot array at `new_capacity` (rounded up to a power
    /// of two, never below `min_capacity`) and re-inserts every live
    /// entry. A no-op if the rounded target equals the current capacity.
    pub(crate) fn rehash(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(self.min_capacity).next_power_of_two();
        if new_capacity == self.capacity {
            return;
        }

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "cgc::registry",
            from = self.capacity,
            to = new_capacity,
            occupied = self.occupied,
            "rehashing registry"
        );

        let old = std::mem::replace(&mut self.slots, vec![None; new_capacity]);
        self.capacity = new_capacity;
        self.occupied = 0;
        for mut entry in old.into_iter().flatten() {
            entry.probe = 0;
            self.insert_entry(entry);
        }
    }

    /// Shrinks the table towards `capacity / 2` if occupancy has fallen
    /// below `sweep_factor`. Only ever called from the sweep phase, while
    /// the collector is paused.
    pub(crate) fn maybe_shrink(&mut self) {
        if self.capacity <= self.min_capacity {
            return;
        }
        if (self.occupied as f64) < self.capacity as f64 * self.sweep_factor {
            self.rehash(self.capacity / 2);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }
}
