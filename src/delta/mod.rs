//! Module implement the delta subsystem: change detection between two
//! content trees, chain management, historical state reconstruction
//! and chain optimization.
//!
//! The contract running through this module is reversibility: every
//! operation a diff produces carries the pre-image needed to undo it,
//! so a chain can be replayed forward from any checkpoint and unwound
//! backward for verification.

mod chain;
mod diff;
mod optimize;
mod reconstruct;

pub use chain::ChainManager;
pub use diff::{diff, diff_content, TEXT_PATCH_THRESHOLD};
pub use optimize::{
    Config as OptimizeConfig, Optimizer, CHECKPOINT_INTERVAL, MAX_CHAIN_LENGTH,
};
pub use reconstruct::Reconstructor;
