// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use bitflags::bitflags;

bitflags! {
    /// Per-entry metadata bits.
    ///
    /// `MARK` is an implementation detail of the mark/sweep cycle: it is
    /// never returned from `get_flags`, and `set_flags` silently drops it
    /// if a caller passes it in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// Entry is a collection root: it survives sweep unconditionally
        /// and is reclaimed only by an explicit `free`.
        const ROOT = 0b001;
        /// Entry's body is opaque to the scanner; it is never read for
        /// interior pointers.
        const LEAF = 0b010;
        /// Set during the mark phase, cleared at the end of every sweep.
        const MARK = 0b100;
    }
}

impl Flags {
    /// The subset of bits a caller is allowed to see or set.
    pub(crate) const USER_MASK: Flags = Flags::ROOT.union(Flags::LEAF);

    pub(crate) fn user_bits(self) -> Flags {
        self & Flags::USER_MASK
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}
