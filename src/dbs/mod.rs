//! Traits and types defining the helix data model.
//!
//! A knowledge [Node] is an immutable record positioned in cylindrical
//! `(t, r, θ)` space, carrying opaque [Value] content. Nodes evolve
//! through [DeltaRecord]s, ordered lists of reversible [DeltaOp]s, and
//! may be snapshotted at points in time as [Checkpoint]s.

use arbitrary::Arbitrary;
use cbordata::Cborize;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::{convert::TryFrom, fmt, result};

use crate::{Error, Result};

mod coord;
mod delta;
mod node;
mod value;

pub use coord::{Coordinate, Rectangle, Weights, TAU};
pub use delta::{Checkpoint, DeltaOp, DeltaRecord, PatchSeg, TextPatch};
pub use node::{Connection, Node};
pub use value::{Path, Property, Token, Value};

/// Trait to be implemented by model types, to compute the memory or
/// disk foot-print of a value.
///
/// **Note: This can be an approximate measure.**
pub trait Footprint {
    /// Return the approximate size of the underlying type, when
    /// stored in memory or serialized on disk.
    ///
    /// NOTE: `isize` is used instead of `usize` because of delta computation.
    fn footprint(&self) -> Result<isize>;
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $ver:expr) => {
        $(#[$doc])*
        #[derive(
            Clone,
            Copy,
            Default,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            Cborize,
            Serialize,
            Deserialize,
            Arbitrary,
        )]
        pub struct $name {
            hi: u64,
            lo: u64,
        }

        impl $name {
            pub const ID: u32 = $ver;

            /// Generate a fresh, globally unique identifier.
            pub fn generate() -> $name {
                $name::from_u128(Uuid::new_v4().as_u128())
            }

            #[inline]
            pub fn from_u128(val: u128) -> $name {
                $name {
                    hi: (val >> 64) as u64,
                    lo: val as u64,
                }
            }

            #[inline]
            pub fn to_u128(&self) -> u128 {
                (u128::from(self.hi) << 64) | u128::from(self.lo)
            }

            /// Big-endian byte rendering, sorts the same as the numeric
            /// value.
            #[inline]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.to_u128().to_be_bytes()
            }

            pub fn from_bytes(data: &[u8]) -> Result<$name> {
                let data = err_at!(
                    Serialization,
                    <[u8; 16]>::try_from(data),
                    "id must be 16 bytes"
                )?;
                Ok($name::from_u128(u128::from_be_bytes(data)))
            }
        }

        impl From<u128> for $name {
            fn from(val: u128) -> $name {
                $name::from_u128(val)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
                write!(f, "{:032x}", self.to_u128())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
                write!(f, concat!(stringify!($name), "<{}>"), self)
            }
        }

        impl Footprint for $name {
            fn footprint(&self) -> Result<isize> {
                err_at!(FailConvert, isize::try_from(std::mem::size_of::<$name>()))
            }
        }
    };
}

id_type!(
    /// Opaque 128-bit identifier for nodes, globally unique.
    NodeId,
    0x00010001
);

id_type!(
    /// Opaque 128-bit identifier for delta records, unique per store.
    DeltaId,
    0x00110001
);

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
