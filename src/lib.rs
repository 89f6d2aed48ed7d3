//! Helix is an embedded storage engine for knowledge nodes positioned
//! in a three-dimensional cylindrical coordinate space, where the axes
//! are `t` for time, `r` for radial relevance and `θ` for angular
//! concept. Nodes are immutable; they evolve through delta-chains,
//! ordered lists of reversible operations that can reconstruct any
//! historical state of a node.
//!
//! The engine is organized as a collection of composable parts:
//!
//! * [dbs] module define the data model, nodes, deltas, checkpoints
//!   and the cylindrical geometry.
//! * [store] module implement durable, journal backed, column-family
//!   storage for node, delta and checkpoint records.
//! * [rtree] module implement the spatial index.
//! * [temporal] module implement the time-bucket index.
//! * [query] module implement the combined index and its planner.
//! * [delta] module implement change-detection, chain management, state
//!   reconstruction and chain optimization.
//! * [cache] module implement the read caches fronting the store.
//! * [Engine] type compose all of the above behind a single handle.
//!
//! Concurrency model: an [Engine] value is cheap to share across
//! threads. Readers are parallel, writers serialize per subsystem, and
//! locks are always acquired in store -> indices -> caches order.

use std::{error, fmt, result};

// Short form to compose Error values.
//
// Long form,
//
// ```ignore
// Err(Error::Storage(String::default(), format!("bad journal")))
// ```
//
// Short form,
//
// ```ignore
// err_at!(Storage, msg: "bad journal")
// ```
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("at {}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("at {}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("at {}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

mod util;
pub mod cache;
mod codec;
pub mod dbs;
pub mod delta;
mod engine;
pub mod query;
pub mod rtree;
pub mod store;
pub mod temporal;

pub use crate::codec::Format;
pub use crate::engine::{Config, Engine, Stats};
pub use crate::query::Query;

/// Error variants that are returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the failing
/// source location, and a message describing the failure.
pub enum Error {
    /// Target id, delta or checkpoint is absent.
    NotFound(String, String),
    /// Insert of an id that already exists, in strict mode.
    DuplicateId(String, String),
    /// Malformed bytes, unknown format tag or version mismatch.
    Serialization(String, String),
    /// I/O or durability failure in the underlying store.
    Storage(String, String),
    /// Delta append or compaction violated chain rules.
    ChainInvariant(String, String),
    /// Malformed query predicate.
    InvalidQuery(String, String),
    /// Rectangle with min > max in a non-wrapping dimension.
    InvalidRectangle(String, String),
    /// Query deadline exceeded.
    QueryTimeout(String, String),
    /// Operation attempted on a non-open engine.
    EngineClosed(String, String),
    /// Numeric or type conversion failure.
    FailConvert(String, String),
    /// Unreachable bug path.
    Fatal(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            NotFound(p, m) => write!(f, "NotFound {} {}", p, m),
            DuplicateId(p, m) => write!(f, "DuplicateId {} {}", p, m),
            Serialization(p, m) => write!(f, "Serialization {} {}", p, m),
            Storage(p, m) => write!(f, "Storage {} {}", p, m),
            ChainInvariant(p, m) => write!(f, "ChainInvariant {} {}", p, m),
            InvalidQuery(p, m) => write!(f, "InvalidQuery {} {}", p, m),
            InvalidRectangle(p, m) => write!(f, "InvalidRectangle {} {}", p, m),
            QueryTimeout(p, m) => write!(f, "QueryTimeout {} {}", p, m),
            EngineClosed(p, m) => write!(f, "EngineClosed {} {}", p, m),
            FailConvert(p, m) => write!(f, "FailConvert {} {}", p, m),
            Fatal(p, m) => write!(f, "Fatal {} {}", p, m),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self)
    }
}

impl error::Error for Error {}

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;
