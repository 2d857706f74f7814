//! B+-tree index over buffer-managed pages.
//!
//! Every node occupies exactly one page. The first four bytes of a node are
//! its header: `level` (u16, 0 for leaves) and `count` (u16), both
//! little-endian. The rest of the page holds fixed-size entries:
//!
//! ```text
//! Inner node:                         Leaf node:
//! +--------------------+ 0           +--------------------+ 0
//! | level: u16         |             | level: u16 (= 0)   |
//! | count: u16         | 2           | count: u16         | 2
//! | reserved: u32      | 4           | reserved: [u8; 12] | 4
//! +--------------------+ 8           +--------------------+ 16
//! | keys: K * cap      |             | keys: K * cap      |
//! +--------------------+             +--------------------+
//! | children: u64 *    |             | values: V * cap    |
//! |   (cap + 1)        |             +--------------------+
//! +--------------------+
//! ```
//!
//! For an inner node `count` is the number of children; only `count - 1`
//! key slots are meaningful. Keys and values are plain-old-data marshalled
//! with `zerocopy`, copied in and out of the page (page buffers make no
//! alignment promises). Pages are written exactly as held in memory, so
//! persisted segments are not portable across endianness.

mod node;
mod tree;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub use tree::BTree;

/// Fixed-size plain-old-data key. The `Ord` impl must be a total order;
/// anything else is a caller bug.
pub trait IndexKey:
    FromBytes + IntoBytes + Immutable + KnownLayout + Copy + Ord + Send + Sync + 'static
{
}

impl<T> IndexKey for T where
    T: FromBytes + IntoBytes + Immutable + KnownLayout + Copy + Ord + Send + Sync + 'static
{
}

/// Fixed-size plain-old-data value.
pub trait IndexValue:
    FromBytes + IntoBytes + Immutable + KnownLayout + Copy + Send + Sync + 'static
{
}

impl<T> IndexValue for T where
    T: FromBytes + IntoBytes + Immutable + KnownLayout + Copy + Send + Sync + 'static
{
}
