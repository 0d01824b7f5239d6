// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{flags::Flags, registry::Registry};

const WORD_SIZE: usize = std::mem::size_of::<usize>();

// Scanning treats every aligned `usize`-wide word as a candidate pointer;
// that's only sound if `usize` and `*const u8` agree on width.
static_assertions::const_assert_eq!(std::mem::size_of::<usize>(), std::mem::size_of::<*const u8>());

/// Walks `[lo, hi)` one aligned word at a time. Every word that exactly
/// matches a live, unmarked registry entry's start address gets `MARK`
/// set; if that entry isn't a `LEAF`, its body is pushed onto `worklist`
/// for the caller to scan in turn, rather than recursing here, so the
/// depth of a chain of heap references never grows the native call stack.
///
/// Only reads words the caller is guaranteed to own: either the body of
/// an already-registered allocation, an enrolled static range, or the
/// thread's own stack between `stack_base` and the current stack pointer.
pub(crate) fn scan_range(lo: usize, hi: usize, registry: &mut Registry, worklist: &mut Vec<(usize, usize)>) {
    debug_assert!(lo <= hi);
    let mut addr = round_up_to_word(lo);
    while addr.checked_add(WORD_SIZE).map_or(false, |end| end <= hi) {
        // SAFETY: `addr` lies in a range the caller owns and is word-aligned.
        let word = unsafe { *(addr as *const usize) };

        if let Some(entry) = registry.lookup_mut(word) {
            if !entry.flags.contains(Flags::MARK) {
                entry.flags.insert(Flags::MARK);
                if !entry.flags.contains(Flags::LEAF) {
                    worklist.push((entry.ptr.as_ptr() as usize, entry.size));
                }
            }
        }

        addr += WORD_SIZE;
    }
}

fn round_up_to_word(addr: usize) -> usize {
    (addr + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}
