//! Module implement common utility functions and types.

use cbordata::{Cbor, FromCbor, IntoCbor};

use crate::{Error, Result};

pub mod files;
pub mod spinlock;

pub use spinlock::Spinlock;

/// Helper function to serialize value `T` implementing IntoCbor, into
/// byte-string.
pub fn into_cbor_bytes<T>(val: T) -> Result<Vec<u8>>
where
    T: IntoCbor,
{
    let mut data: Vec<u8> = vec![];
    let n = err_at!(
        Serialization,
        err_at!(Serialization, val.into_cbor())?.encode(&mut data)
    )?;
    if n != data.len() {
        err_at!(Fatal, msg: "cbor encoding len mistmatch {} {}", n, data.len())
    } else {
        Ok(data)
    }
}

/// Helper function to deserialize value `T` implementing FromCbor, from
/// byte-string. Return (value, bytes-consumed).
pub fn from_cbor_bytes<T>(mut data: &[u8]) -> Result<(T, usize)>
where
    T: FromCbor,
{
    let (val, n) = err_at!(Serialization, Cbor::decode(&mut data))?;
    Ok((err_at!(Serialization, T::from_cbor(val))?, n))
}

/// Order preserving encoding for timestamps. For any two finite
/// timestamps `a <= b`, `ts_to_bits(a) <= ts_to_bits(b)`, so that the
/// big-endian byte rendering of the bits sorts in time order.
#[inline]
pub fn ts_to_bits(ts: f64) -> u64 {
    let bits = ts.to_bits();
    if (bits as i64) < 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

/// Inverse of [ts_to_bits].
#[inline]
pub fn bits_to_ts(bits: u64) -> f64 {
    if (bits & 0x8000_0000_0000_0000) != 0 {
        f64::from_bits(bits & 0x7FFF_FFFF_FFFF_FFFF)
    } else {
        f64::from_bits(!bits)
    }
}

/// Content checksum used by journal batches.
#[inline]
pub fn checksum(data: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(data)
}
