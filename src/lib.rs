//! Monotone minimal perfect hashing: `rank(key) -> 0..n` over a fixed,
//! sorted key set, built from a BBHash-style MPHF, a succinct approximate
//! z-fast trie, and a bucketed locator layer on top of both. See
//! `SPEC_FULL.md` / `DESIGN.md` for the full design and grounding.

pub mod azft;
pub mod bitstring;
pub mod bitvector;
pub mod bucket;
pub mod error;
pub mod exact_trie;
pub mod mmph;
pub mod mphf;
pub mod params;

pub use azft::{ApproxZFastTrie, AzftConfig, NodeData};
pub use bitstring::BitString;
pub use bucket::Bucket;
pub use error::{MmphError, MphError};
pub use exact_trie::ExactZFastTrie;
pub use mmph::{AzftMmph, BucketMmphConfig, LcpMmph};
pub use mphf::{Mphf, MphfConfig};
