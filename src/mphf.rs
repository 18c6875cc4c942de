//! BBHash-style minimal perfect hash function.
//!
//! Bijects a set of `N` build-time items onto `[1..N]` without preserving
//! any order (see `crate::mmph` for the order-preserving layer built on top).
//! Construction proceeds in levels: each level claims the items that hash
//! without collision into a freshly sized bitvector, and passes the rest to
//! the next level. See spec section "MPHF (BBHash)".

use crate::bitstring::BitString;
use crate::bitvector::{Bitvector, RankBlocks};
use crate::error::MphError;
use log::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default load factor (bits allocated per survivor at each level). The
/// BBHash paper recommends 1.3-5.0; 2.0 is a good space/rehash-rate balance.
pub const DEFAULT_GAMMA: f64 = 2.0;

/// Hard ceiling on level count; exceeding it without resolving all items
/// indicates a pathological input (e.g. a degenerate hash) rather than bad
/// luck, so this crate treats it as an error instead of implementing the
/// optional final-level direct-map fallback the paper allows.
const MAX_LEVELS: u32 = 64;

/// Build-time tuning knobs for [`Mphf::build_with_config`], generalizing the
/// teacher crate's `BuildConfig` (gamma only; the MPHF primitive here has no
/// salt/rehash-limit of its own — rehashing on collision happens implicitly
/// level by level, not by restarting the whole build).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MphfConfig {
    /// Bits allocated per survivor at each level; see [`DEFAULT_GAMMA`].
    pub gamma: f64,
}

impl Default for MphfConfig {
    fn default() -> Self {
        Self { gamma: DEFAULT_GAMMA }
    }
}

/// Anything that can be hashed, with a seed, into a 64-bit digest for MPHF
/// construction and querying. Keeping this as a trait (rather than baking a
/// hasher into `Mphf` itself) lets the same BBHash machinery back the bucket
/// MPHFs, the LCP-prefix tables, and the AZFT handle dictionary, each with
/// their own hashing convention (see spec section "Design Notes").
pub trait MphfItem {
    fn mphf_hash(&self, seed: u64) -> u64;
}

impl MphfItem for BitString {
    #[inline]
    fn mphf_hash(&self, seed: u64) -> u64 {
        self.hash_with_seed(seed)
    }
}

impl MphfItem for &BitString {
    #[inline]
    fn mphf_hash(&self, seed: u64) -> u64 {
        (*self).hash_with_seed(seed)
    }
}

/// A built minimal perfect hash function over `N` items.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mphf {
    bitvectors: Vec<Bitvector>,
    rank_blocks: Vec<RankBlocks>,
    #[cfg_attr(feature = "serde", serde(skip))]
    level_offset: Vec<u64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    n: u64,
}

impl Mphf {
    /// Builds an MPHF over `items`, using `seed` as the base for per-level
    /// hashing and `gamma` as the load factor. The same `seed` must be
    /// supplied again at query time.
    pub fn build<T: MphfItem>(items: &[T], seed: u64, gamma: f64) -> Result<Self, MphError> {
        Self::build_with_config(items, seed, &MphfConfig { gamma })
    }

    /// Builds an MPHF using an explicit [`MphfConfig`] rather than a bare
    /// `gamma`; equivalent to [`Self::build`] but matches the
    /// config-struct-plus-`Default` convention the rest of this crate's
    /// tunables follow.
    pub fn build_with_config<T: MphfItem>(
        items: &[T],
        seed: u64,
        config: &MphfConfig,
    ) -> Result<Self, MphError> {
        let gamma = config.gamma;
        assert!(gamma > 0.0, "gamma must be positive");
        let n = items.len();
        let mut survivors: Vec<usize> = (0..n).collect();
        let mut bitvectors = Vec::new();
        let mut rank_blocks = Vec::new();
        let mut level_offset = Vec::new();
        let mut cumulative = 0u64;
        let mut level = 0u32;

        while !survivors.is_empty() {
            if level >= MAX_LEVELS {
                return Err(MphError::MaxLevelsExceeded(MAX_LEVELS));
            }
            let level_seed = mix_level_seed(seed, level);
            let size = round_up_64(((gamma * survivors.len() as f64).ceil() as usize).max(1));

            let mut occupied = Bitvector::new_zeroed(size);
            let mut collided = Bitvector::new_zeroed(size);
            for &idx in &survivors {
                let pos = (items[idx].mphf_hash(level_seed) % size as u64) as usize;
                if occupied.get(pos) {
                    collided.set(pos);
                } else {
                    occupied.set(pos);
                }
            }
            clear_collisions(&mut occupied, &collided);

            let mut next_survivors = Vec::with_capacity(survivors.len());
            for &idx in &survivors {
                let pos = (items[idx].mphf_hash(level_seed) % size as u64) as usize;
                if !occupied.get(pos) {
                    next_survivors.push(idx);
                }
            }

            let rb = RankBlocks::build(&occupied);
            let claimed = rb.total_ones(&occupied);
            trace!(
                "mphf level {level}: {} survivors in, {} claimed, {} survivors out",
                survivors.len(),
                claimed,
                next_survivors.len()
            );

            level_offset.push(cumulative);
            cumulative += claimed;
            bitvectors.push(occupied);
            rank_blocks.push(rb);
            survivors = next_survivors;
            level += 1;
        }

        debug_assert_eq!(cumulative, n as u64);
        Ok(Mphf {
            bitvectors,
            rank_blocks,
            level_offset,
            n: n as u64,
        })
    }

    /// Queries the MPHF for `item`, using the same `seed` passed to
    /// [`Self::build`]. Returns a value in `[1..=N]` for build-set members;
    /// returns an arbitrary value in `[0..=N]` (0 included) for non-members.
    pub fn query<T: MphfItem>(&self, item: &T, seed: u64) -> u64 {
        for (level, bv) in self.bitvectors.iter().enumerate() {
            let level_seed = mix_level_seed(seed, level as u32);
            let pos = (item.mphf_hash(level_seed) % bv.len_bits() as u64) as usize;
            if bv.get(pos) {
                let r = self.rank_blocks[level].rank(bv, pos);
                return self.level_offset[level] + r + 1;
            }
        }
        0
    }

    /// Number of items this MPHF was built over.
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Number of levels.
    pub fn level_count(&self) -> usize {
        self.bitvectors.len()
    }

    /// Approximate resident heap bytes, for `BucketMmph::byte_size`.
    pub fn heap_bytes(&self) -> usize {
        let bv_bytes: usize = self
            .bitvectors
            .iter()
            .map(|b| b.words().len() * 8)
            .sum();
        let rank_bytes: usize = self
            .rank_blocks
            .iter()
            .map(|r| r.raw().len() * 8)
            .sum();
        bv_bytes + rank_bytes
    }

    /// Recomputes `level_offset` and `n` from `bitvectors`/`rank_blocks`.
    /// Required after deserializing from the wire format, which carries
    /// neither field (spec section 6.1).
    fn recompute_derived(&mut self) {
        let mut cumulative = 0u64;
        let mut offsets = Vec::with_capacity(self.bitvectors.len());
        for (bv, rb) in self.bitvectors.iter().zip(self.rank_blocks.iter()) {
            offsets.push(cumulative);
            cumulative += rb.total_ones(bv);
        }
        self.level_offset = offsets;
        self.n = cumulative;
    }

    /// Serializes to the byte-exact little-endian framed format from spec
    /// section 6.1: `u32 L`, per-level bitvector words, `u32 L'` (must equal
    /// `L`), then per-level rank-block words.
    pub fn serialize(&self) -> Vec<u8> {
        let l = self.bitvectors.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&l.to_le_bytes());
        for bv in &self.bitvectors {
            let words = bv.words();
            out.extend_from_slice(&(words.len() as u32).to_le_bytes());
            for w in words {
                out.extend_from_slice(&w.to_le_bytes());
            }
        }
        out.extend_from_slice(&l.to_le_bytes());
        for rb in &self.rank_blocks {
            let words = rb.raw();
            out.extend_from_slice(&(words.len() as u32).to_le_bytes());
            for w in words {
                out.extend_from_slice(&w.to_le_bytes());
            }
        }
        out
    }

    /// Deserializes from the format written by [`Self::serialize`]. Fails on
    /// truncation, on an `L`/`L'` mismatch, or on trailing bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, MphError> {
        let mut cursor = Cursor::new(bytes);
        let l = cursor.read_u32()?;

        // We need the per-level bit lengths to reconstruct `Bitvector`s, but
        // the format doesn't carry them explicitly: each bitvector's bit
        // length is `words * 64` (the invariant that bitvectors are always
        // rounded up to a whole number of 64-bit words, spec section 3.2,
        // means this recovers exactly the length used at build time).
        let mut bitvectors = Vec::with_capacity(l as usize);
        for _ in 0..l {
            let words_len = cursor.read_u32()? as usize;
            let mut words = Vec::with_capacity(words_len);
            for _ in 0..words_len {
                words.push(cursor.read_u64()?);
            }
            let len_bits = words_len * 64;
            bitvectors.push(Bitvector::from_words(words, len_bits));
        }

        let l2 = cursor.read_u32()?;
        if l2 != l {
            return Err(MphError::Deserialize("level count mismatch (L != L')"));
        }

        let mut rank_blocks = Vec::with_capacity(l as usize);
        for _ in 0..l {
            let rank_len = cursor.read_u32()? as usize;
            let mut raw = Vec::with_capacity(rank_len);
            for _ in 0..rank_len {
                raw.push(cursor.read_u64()?);
            }
            rank_blocks.push(RankBlocks::from_raw(raw));
        }

        if !cursor.is_exhausted() {
            return Err(MphError::Deserialize("trailing bytes after rank blocks"));
        }

        let mut mphf = Mphf {
            bitvectors,
            rank_blocks,
            level_offset: Vec::new(),
            n: 0,
        };
        mphf.recompute_derived();
        Ok(mphf)
    }

    /// Convenience whole-structure serialization via bincode (distinct from
    /// the byte-exact wire format mandated for `serialize`/`deserialize`).
    #[cfg(feature = "serde")]
    pub fn to_bincode(&self) -> Result<Vec<u8>, MphError> {
        Ok(bincode::serialize(self)?)
    }

    #[cfg(feature = "serde")]
    pub fn from_bincode(bytes: &[u8]) -> Result<Self, MphError> {
        let mut mphf: Mphf = bincode::deserialize(bytes)?;
        mphf.recompute_derived();
        Ok(mphf)
    }
}

fn clear_collisions(occupied: &mut Bitvector, collided: &Bitvector) {
    let mut cleared = Bitvector::new_zeroed(occupied.len_bits());
    for i in 0..occupied.len_bits() {
        if occupied.get(i) && !collided.get(i) {
            cleared.set(i);
        }
    }
    *occupied = cleared;
}

#[inline]
fn round_up_64(bits: usize) -> usize {
    ((bits + 63) / 64) * 64
}

#[inline]
fn mix_level_seed(seed: u64, level: u32) -> u64 {
    splitmix64(seed ^ splitmix64(level as u64 ^ 0x9E3779B97F4A7C15))
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Minimal little-endian byte cursor for the hand-rolled wire format.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u32(&mut self) -> Result<u32, MphError> {
        if self.pos + 4 > self.bytes.len() {
            return Err(MphError::Deserialize("truncated u32 field"));
        }
        let v = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn read_u64(&mut self) -> Result<u64, MphError> {
        if self.pos + 8 > self.bytes.len() {
            return Err(MphError::Deserialize("truncated u64 field"));
        }
        let v = u64::from_le_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<BitString> {
        (0..n)
            .map(|i| BitString::from_bytes(&(i as u32).to_be_bytes()))
            .collect()
    }

    #[test]
    fn perfect_bijection() {
        let items = keys(2000);
        let mphf = Mphf::build(&items, 42, DEFAULT_GAMMA).unwrap();
        let mut seen = vec![false; items.len()];
        for item in &items {
            let r = mphf.query(item, 42);
            assert!(r >= 1 && r as usize <= items.len(), "out of range: {r}");
            assert!(!seen[(r - 1) as usize], "duplicate assignment {r}");
            seen[(r - 1) as usize] = true;
        }
        assert!(seen.into_iter().all(|b| b));
    }

    #[test]
    fn build_with_config_matches_build() {
        let items = keys(500);
        let a = Mphf::build(&items, 7, 2.0).unwrap();
        let b = Mphf::build_with_config(&items, 7, &MphfConfig { gamma: 2.0 }).unwrap();
        assert_eq!(a, b);
        assert_eq!(MphfConfig::default().gamma, DEFAULT_GAMMA);
    }

    #[test]
    fn reproducible_build() {
        let items = keys(500);
        let a = Mphf::build(&items, 7, DEFAULT_GAMMA).unwrap();
        let b = Mphf::build(&items, 7, DEFAULT_GAMMA).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn round_trip_serialization() {
        let items = keys(300);
        let mphf = Mphf::build(&items, 99, DEFAULT_GAMMA).unwrap();
        let bytes = mphf.serialize();
        let back = Mphf::deserialize(&bytes).unwrap();
        assert_eq!(mphf.bitvectors, back.bitvectors);
        assert_eq!(mphf.rank_blocks, back.rank_blocks);
        for item in &items {
            assert_eq!(mphf.query(item, 99), back.query(item, 99));
        }
    }

    #[test]
    fn deserialize_rejects_truncation() {
        let items = keys(50);
        let mphf = Mphf::build(&items, 1, DEFAULT_GAMMA).unwrap();
        let mut bytes = mphf.serialize();
        bytes.truncate(bytes.len() - 4);
        assert!(Mphf::deserialize(&bytes).is_err());
    }

    #[test]
    fn deserialize_rejects_trailing_bytes() {
        let items = keys(50);
        let mphf = Mphf::build(&items, 1, DEFAULT_GAMMA).unwrap();
        let mut bytes = mphf.serialize();
        bytes.push(0xAB);
        assert!(Mphf::deserialize(&bytes).is_err());
    }

    #[test]
    fn deserialize_rejects_level_count_mismatch() {
        let items = keys(50);
        let mphf = Mphf::build(&items, 1, DEFAULT_GAMMA).unwrap();
        let mut bytes = mphf.serialize();
        // Corrupt L' (the second copy of the level count).
        let l = mphf.bitvectors.len() as u32;
        let mut offset = 4;
        for bv in &mphf.bitvectors {
            offset += 4 + bv.words().len() * 8;
        }
        bytes[offset..offset + 4].copy_from_slice(&(l + 1).to_le_bytes());
        assert!(Mphf::deserialize(&bytes).is_err());
    }

    #[test]
    fn non_member_query_never_panics() {
        let items = keys(100);
        let mphf = Mphf::build(&items, 3, DEFAULT_GAMMA).unwrap();
        let stranger = BitString::from_bytes(b"not a build-time key at all");
        let _ = mphf.query(&stranger, 3);
    }
}
