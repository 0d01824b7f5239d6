// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use thiserror::Error;

/// Internal failure modes of the collector.
///
/// Every public entry point collapses these to `None` per the facade's
/// "never throws" contract; the `try_*` variants expose this type directly
/// for callers that want to tell the two apart.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum GcError {
    /// The raw allocator returned null even after a forced collection.
    #[error("allocator exhausted after forced collection")]
    OutOfMemory,
    /// `num * size` would overflow `usize` in a `callocate` call.
    #[error("allocation size overflowed the address width")]
    SizeOverflow,
}
