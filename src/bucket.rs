//! A single bucket of the Bucket MMPH: an MPHF over up to `b` keys plus the
//! local-rank array that turns the MPHF's unordered slot into the key's
//! actual position within the bucket. See spec section "Bucket".

use crate::bitstring::BitString;
use crate::error::MphError;
use crate::mphf::{Mphf, DEFAULT_GAMMA};

/// Buckets never hold more than this many keys; `local_ranks` is stored as
/// `u8`, so a bucket-local position must fit in `0..=255`.
pub const MAX_BUCKET_SIZE: usize = 256;

/// One bucket: an MPHF over its keys, a local-rank permutation, and the
/// first key of the bucket (its delimiter in the parent structure).
#[derive(Debug, Clone)]
pub struct Bucket {
    mphf: Mphf,
    local_ranks: Vec<u8>,
    delimiter: BitString,
}

impl Bucket {
    /// Builds a bucket from `keys` (must already be sorted in the order the
    /// caller wants ranks assigned in, and `keys.len() <= MAX_BUCKET_SIZE`).
    /// `keys[0]` becomes the bucket's delimiter.
    pub fn build(keys: &[BitString], seed: u64) -> Result<Self, MphError> {
        assert!(!keys.is_empty(), "a bucket must have at least one key");
        assert!(
            keys.len() <= MAX_BUCKET_SIZE,
            "bucket size {} exceeds MAX_BUCKET_SIZE ({MAX_BUCKET_SIZE})",
            keys.len()
        );

        let mphf = Mphf::build(keys, seed, DEFAULT_GAMMA)?;
        let mut local_ranks = vec![0u8; keys.len()];
        for (local_pos, key) in keys.iter().enumerate() {
            let phf_slot = mphf.query(key, seed);
            local_ranks[(phf_slot - 1) as usize] = local_pos as u8;
        }

        Ok(Self {
            mphf,
            local_ranks,
            delimiter: keys[0].clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.local_ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_ranks.is_empty()
    }

    pub fn delimiter(&self) -> &BitString {
        &self.delimiter
    }

    /// The bucket-local rank of `key` in `0..len()`, or `None` if `key` is
    /// not actually a member (the MPHF itself cannot detect this; callers
    /// must verify the returned position against the real key set).
    pub fn local_rank(&self, key: &BitString, seed: u64) -> Option<usize> {
        let slot = self.mphf.query(key, seed);
        if slot == 0 || slot as usize > self.local_ranks.len() {
            return None;
        }
        Some(self.local_ranks[(slot - 1) as usize] as usize)
    }

    pub fn heap_bytes(&self) -> usize {
        self.mphf.heap_bytes() + self.local_ranks.len()
    }
}
