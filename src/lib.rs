// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A conservative, thread-local, mark-and-sweep garbage collector.
//!
//! Allocations are handed out as raw, untyped bytes through a [`Collector`]
//! value; there is no smart pointer and no `Drop`-based tracking. Liveness
//! is instead inferred by scanning memory the collector is told about (the
//! live stack range, any enrolled static ranges, and the bodies of managed
//! allocations not flagged [`Flags::LEAF`]) for bit patterns that happen to
//! equal the start address of a managed allocation. This is deliberately
//! imprecise: an integer that happens to alias a live allocation's address
//! will keep it alive for one more cycle. See [`Collector`] for the full
//! operation surface.

mod alloc;
mod collector;
mod debug_flags;
mod error;
mod flags;
mod hash;
mod mark;
mod registry;
mod scanner;
mod stack;
mod sweep;
mod tunables;

pub use crate::alloc::{RawAllocator, SystemAllocator};
pub use crate::collector::Collector;
pub use crate::debug_flags::DebugFlags;
pub use crate::error::GcError;
pub use crate::flags::Flags;
pub use crate::tunables::Tunables;

/// A callback run on an allocation's body the moment sweep reclaims it,
/// exactly once, with no ordering guarantee relative to other destructors
/// invoked in the same cycle. Registered per-allocation via
/// [`Collector::allocate_opt`]/[`Collector::set_dtor`].
pub type Destructor = fn(*mut u8);
