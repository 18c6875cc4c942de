//! Approximate z-fast trie (AZFT): a succinct, MPHF-backed projection of the
//! exact trie that answers `get_existing_prefix`/`lower_bound` queries with
//! bounded false-positive rate instead of certainty. See spec section
//! "Approximate z-fast trie".

use crate::bitstring::BitString;
use crate::error::MmphError;
use crate::exact_trie::{two_fattest, ExactZFastTrie};
use crate::mphf::{Mphf, DEFAULT_GAMMA};
use hashbrown::HashMap;
use log::{debug, warn};
use std::hash::BuildHasherDefault;

const SENTINEL: u32 = u32::MAX;

/// Default cap on Las Vegas rebuild attempts, mirrored from
/// `crate::mmph::MAX_REBUILDS` so this module doesn't need to depend on it.
pub const DEFAULT_MAX_REBUILDS: u32 = 100;

/// Build-time tuning knobs for the Las Vegas rebuild loop
/// ([`build_validated`]): signature width and attempt budget, grouped into
/// one config struct with a `Default` impl rather than passed positionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AzftConfig {
    /// Signature width in bits (`S` in spec terms). `None` defers to the
    /// caller computing it via `crate::params::signature_bits_relative_trie`.
    pub sig_bits: Option<u32>,
    /// Maximum rebuild attempts before giving up with
    /// [`crate::error::MmphError::RebuildExhausted`].
    pub max_rebuilds: u32,
}

impl Default for AzftConfig {
    fn default() -> Self {
        Self {
            sig_bits: None,
            max_rebuilds: DEFAULT_MAX_REBUILDS,
        }
    }
}

/// One entry of the flat node array backing an [`ApproxZFastTrie`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeData {
    pub extent_len: u32,
    pub p_sig: u64,
    pub parent: u32,
    pub min_child: u32,
    pub min_greater_child: u32,
    pub right_child: u32,
    pub rank: u32,
}

impl Default for NodeData {
    fn default() -> Self {
        Self {
            extent_len: 0,
            p_sig: 0,
            parent: SENTINEL,
            min_child: SENTINEL,
            min_greater_child: SENTINEL,
            right_child: SENTINEL,
            rank: SENTINEL,
        }
    }
}

impl NodeData {
    #[inline]
    pub fn has_rank(&self) -> bool {
        self.rank != SENTINEL
    }

    #[inline]
    pub fn has_right_child(&self) -> bool {
        self.right_child != SENTINEL
    }

    #[inline]
    pub fn has_min_greater_child(&self) -> bool {
        self.min_greater_child != SENTINEL
    }
}

/// A succinct, MPHF-backed approximation of a z-fast trie over a fixed set
/// of delimiter keys.
pub struct ApproxZFastTrie {
    data: Vec<NodeData>,
    mphf: Mphf,
    seed: u64,
    sig_bits: u32,
    root_id: u32,
}

impl ApproxZFastTrie {
    /// Builds a single AZFT instance from `delimiters` (need not be sorted,
    /// but must be distinct) and `seed`. Does not retry on validation
    /// failure; see [`build_validated`] for the Las Vegas rebuild loop the
    /// bucket MMPH actually uses.
    pub fn build(delimiters: &[BitString], seed: u64, sig_bits: u32) -> Result<Self, MmphError> {
        assert!(sig_bits >= 1 && sig_bits <= 63, "sig_bits out of range");

        let mut trie: ExactZFastTrie<u32> = ExactZFastTrie::new();
        for (i, d) in delimiters.iter().enumerate() {
            trie.insert(d.clone(), i as u32);
        }

        let node_indices = trie.reachable_nodes();
        let mut handles: Vec<(BitString, usize)> = node_indices
            .iter()
            .map(|&idx| (trie.handle(idx), idx))
            .collect();
        handles.sort_by(|a, b| a.0.compare(&b.0));

        let handle_strings: Vec<BitString> = handles.iter().map(|(h, _)| h.clone()).collect();
        let mphf = Mphf::build(&handle_strings, seed, DEFAULT_GAMMA)?;

        let mut node_to_slot: HashMap<usize, usize, BuildHasherDefault<ahash::AHasher>> =
            HashMap::default();
        for (h, node_idx) in &handles {
            let slot = mphf.query(h, seed) as usize - 1;
            node_to_slot.insert(*node_idx, slot);
        }

        let u = handle_strings.len();
        let mut data = vec![NodeData::default(); u];

        for &node_idx in &node_indices {
            let slot = node_to_slot[&node_idx];
            let extent = trie.extent(node_idx);
            let extent_len = extent.size();
            let mask = sig_mask(sig_bits);
            let p_sig = extent.hash_with_seed(seed) & mask;

            let min_child = node_to_slot[&leftmost_leaf(&trie, node_idx)] as u32;
            let (min_greater_child, right_child) = match trie.right(node_idx) {
                Some(r) => (
                    node_to_slot[&leftmost_leaf(&trie, r)] as u32,
                    node_to_slot[&r] as u32,
                ),
                None => (SENTINEL, SENTINEL),
            };
            let rank = trie.value(node_idx).copied().unwrap_or(SENTINEL);

            data[slot] = NodeData {
                extent_len,
                p_sig,
                parent: SENTINEL,
                min_child,
                min_greater_child,
                right_child,
                rank,
            };
        }

        if let Some(root) = trie.root() {
            set_parents(&trie, root, SENTINEL, &node_to_slot, &mut data);
        }

        let root_id = trie
            .root()
            .map(|r| node_to_slot[&r] as u32)
            .unwrap_or(SENTINEL);

        Ok(Self {
            data,
            mphf,
            seed,
            sig_bits,
            root_id,
        })
    }

    /// The (up to three-check) probabilistic search for the deepest node
    /// whose extent is an existing prefix of `pattern`. Always returns a
    /// node: an empty trie is not representable here (callers never build
    /// an AZFT over zero delimiters).
    pub fn get_existing_prefix(&self, pattern: &BitString) -> NodeData {
        let mut a = 0u32;
        let mut b = pattern.size();
        let mut best = self.root_id;

        while a < b {
            let f = two_fattest(a, b);
            if f == 0 {
                break;
            }
            let probe = pattern.prefix(f);
            let slot = self.mphf.query(&probe, self.seed);

            let candidate = if slot == 0 {
                None
            } else {
                let idx = (slot - 1) as usize;
                self.data.get(idx).map(|n| (idx, n))
            };

            let accepted = candidate.is_some_and(|(_, node)| {
                pattern.size() >= node.extent_len
                    && node.extent_len >= f
                    && {
                        let sig = pattern.prefix(node.extent_len).hash_with_seed(self.seed)
                            & sig_mask(self.sig_bits);
                        sig == node.p_sig
                    }
            });

            if accepted {
                let (idx, node) = candidate.unwrap();
                best = idx as u32;
                a = node.extent_len;
            } else {
                b = f.saturating_sub(1);
            }
        }

        self.data[best as usize]
    }

    /// Up to six candidate nodes that bracket `pattern`'s rank, per the
    /// "Approximate z-fast trie" lower-bound procedure. Callers must probe
    /// all returned candidates against the actual bucket contents.
    pub fn lower_bound(&self, pattern: &BitString) -> Vec<NodeData> {
        let node = self.get_existing_prefix(pattern);
        let mut out = Vec::with_capacity(6);

        out.push(self.data[node.min_child as usize]);
        if node.has_min_greater_child() {
            out.push(self.data[node.min_greater_child as usize]);
        }
        if let Some(c) = self.walk_parents_until_break(&node, |n| n.min_greater_child) {
            out.push(c);
        }
        if let Some(c) = self.walk_parents_until_break(&node, |n| n.right_child) {
            out.push(c);
        }
        if node.has_right_child() {
            out.push(self.data[node.right_child as usize]);
        }
        out.push(node);
        out
    }

    fn walk_parents_until_break<F: Fn(&NodeData) -> u32>(
        &self,
        start: &NodeData,
        field: F,
    ) -> Option<NodeData> {
        let mut cur = start.parent;
        while cur != SENTINEL {
            let p = &self.data[cur as usize];
            let f = field(p);
            if f != SENTINEL {
                return Some(self.data[f as usize]);
            }
            cur = p.parent;
        }
        None
    }

    pub fn node_count(&self) -> usize {
        self.data.len()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn heap_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<NodeData>() + self.mphf.heap_bytes()
    }
}

#[inline]
fn sig_mask(sig_bits: u32) -> u64 {
    if sig_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << sig_bits) - 1
    }
}

fn leftmost_leaf<V: Clone>(trie: &ExactZFastTrie<V>, mut idx: usize) -> usize {
    loop {
        match trie.left(idx) {
            Some(l) => idx = l,
            None => return idx,
        }
    }
}

fn set_parents<V: Clone>(
    trie: &ExactZFastTrie<V>,
    idx: usize,
    ancestor: u32,
    node_to_slot: &HashMap<usize, usize, BuildHasherDefault<ahash::AHasher>>,
    data: &mut [NodeData],
) {
    let slot = node_to_slot[&idx];
    data[slot].parent = ancestor;
    if let Some(l) = trie.left(idx) {
        set_parents(trie, l, slot as u32, node_to_slot, data);
    }
    if let Some(r) = trie.right(idx) {
        // Nodes reached only via right edges keep the ancestor unchanged:
        // they are not in `idx`'s left subtree.
        set_parents(trie, r, ancestor, node_to_slot, data);
    }
}

/// Like [`build_validated`], but takes an [`AzftConfig`] instead of bare
/// `sig_bits`/`max_rebuilds` arguments. `default_sig_bits` is used when
/// `config.sig_bits` is `None` (the usual case: callers compute it from
/// `crate::params::signature_bits_relative_trie` and only override it
/// explicitly for testing).
pub fn build_validated_with_config(
    delimiters: &[BitString],
    input_keys: &[BitString],
    base_seed: u64,
    default_sig_bits: u32,
    bucket_size: usize,
    config: &AzftConfig,
) -> Result<(ApproxZFastTrie, u32), MmphError> {
    let sig_bits = config.sig_bits.unwrap_or(default_sig_bits);
    build_validated(delimiters, input_keys, base_seed, sig_bits, bucket_size, config.max_rebuilds)
}

/// Builds an AZFT and validates it against `input_keys`/`bucket_size`,
/// retrying with a freshly mixed seed (Las Vegas style) up to
/// `max_rebuilds` times. This is the entry point the bucket MMPH actually
/// calls; a bare [`ApproxZFastTrie::build`] gives no false-positive-rate
/// guarantee on its own.
pub fn build_validated(
    delimiters: &[BitString],
    input_keys: &[BitString],
    base_seed: u64,
    sig_bits: u32,
    bucket_size: usize,
    max_rebuilds: u32,
) -> Result<(ApproxZFastTrie, u32), MmphError> {
    for attempt in 0..max_rebuilds {
        let seed = mix_rebuild_seed(base_seed, attempt);
        let azft = ApproxZFastTrie::build(delimiters, seed, sig_bits)?;
        if validate_all_keys(input_keys, &azft, bucket_size) {
            if attempt > 0 {
                debug!("AZFT validated after {attempt} rebuild(s)");
            }
            return Ok((azft, attempt));
        }
        warn!("AZFT rebuild {attempt} failed validation, retrying with a new seed");
    }
    Err(MmphError::RebuildExhausted(max_rebuilds))
}

fn mix_rebuild_seed(base_seed: u64, attempt: u32) -> u64 {
    base_seed ^ (attempt as u64).wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(0xD1B54A32D192ED03)
}

fn validate_all_keys(keys: &[BitString], azft: &ApproxZFastTrie, bucket_size: usize) -> bool {
    for (i, key) in keys.iter().enumerate() {
        let expected_bucket = i / bucket_size;
        let candidates = azft.lower_bound(key);
        if !candidates
            .iter()
            .any(|c| c.has_rank() && c.rank as usize == expected_bucket)
        {
            return false;
        }
    }
    true
}
