//! Module implement the record serializer.
//!
//! Every durable record is framed as
//! `format_tag(1B) || schema_version(1B) || payload`. Two formats are
//! supported, selectable when the store is opened: compact CBOR for
//! durability and self-describing JSON for debug/export. Decoding is
//! driven by the frame tag, so either format can be read back
//! regardless of the configured one. Decoders accept the current
//! schema version and one older version.

use cbordata::{FromCbor, IntoCbor};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{util, Error, Result};

const FORMAT_BINARY: u8 = 0x01;
const FORMAT_TEXT: u8 = 0x02;

/// Current schema version stamped on encoded records.
pub const SCHEMA_VERSION: u8 = 0x02;
/// Oldest schema version decoders still accept.
pub const SCHEMA_COMPAT: u8 = 0x01;

/// Serialization format for durable records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Binary,
    Text,
}

impl Default for Format {
    fn default() -> Format {
        Format::Binary
    }
}

impl Format {
    fn to_tag(self) -> u8 {
        match self {
            Format::Binary => FORMAT_BINARY,
            Format::Text => FORMAT_TEXT,
        }
    }
}

/// Encode `value` into a framed record.
pub fn encode<T>(format: Format, value: T) -> Result<Vec<u8>>
where
    T: IntoCbor + Serialize,
{
    let payload = match format {
        Format::Binary => util::into_cbor_bytes(value)?,
        Format::Text => err_at!(Serialization, serde_json::to_vec(&value))?,
    };

    let mut data = Vec::with_capacity(payload.len() + 2);
    data.push(format.to_tag());
    data.push(SCHEMA_VERSION);
    data.extend_from_slice(&payload);
    Ok(data)
}

/// Decode a framed record back into its value. Never panics on user
/// content; malformed input fails with `Serialization`.
pub fn decode<T>(data: &[u8]) -> Result<T>
where
    T: FromCbor + DeserializeOwned,
{
    if data.len() < 2 {
        err_at!(Serialization, msg: "truncated record, {} bytes", data.len())?;
    }

    let version = data[1];
    if !(SCHEMA_COMPAT..=SCHEMA_VERSION).contains(&version) {
        err_at!(Serialization, msg: "unknown schema version {}", version)?;
    }

    match data[0] {
        FORMAT_BINARY => {
            let (val, n) = util::from_cbor_bytes(&data[2..])?;
            if n != data.len() - 2 {
                err_at!(
                    Serialization,
                    msg: "trailing garbage, {} of {} bytes", n, data.len() - 2
                )?;
            }
            Ok(val)
        }
        FORMAT_TEXT => err_at!(Serialization, serde_json::from_slice(&data[2..])),
        tag => err_at!(Serialization, msg: "unknown format tag {:x}", tag),
    }
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
