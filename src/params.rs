//! Pure parameter-selection helpers (spec section "Parameter selection").
//!
//! None of these touch the filesystem or RNG; they are plain arithmetic and
//! are unit-tested directly.

/// `ceil(n / b)`.
pub fn bucket_count(n: usize, b: usize) -> usize {
    assert!(b > 0, "bucket size must be positive");
    (n + b - 1) / b
}

/// Smallest of `{8, 16, 32, 64}` able to hold the value `v`.
pub fn width_for_max_value(v: u64) -> u8 {
    if v <= u8::MAX as u64 {
        8
    } else if v <= u16::MAX as u64 {
        16
    } else if v <= u32::MAX as u64 {
        32
    } else {
        64
    }
}

/// Width needed to hold the maximum bit length of a key, `w`.
pub fn width_for_bit_length(w: u32) -> u8 {
    width_for_max_value(w as u64)
}

/// Width needed for a trie node index, given `m` delimiter leaves: the trie
/// has at most `2m - 1` nodes, so `2m` is a safe upper bound; one extra
/// value is reserved as the all-ones sentinel.
pub fn width_for_delimiter_trie_index(m: usize) -> u8 {
    let upper_bound = (2 * m) as u64 + 1;
    width_for_max_value(upper_bound)
}

/// `max(1, ceil(log2(log2(w)) + log2(1/eps)))`, with the log-log term
/// defined as 0 when `w <= 2` (where `log2(log2(w))` would be undefined or
/// negative).
pub fn signature_bits_probabilistic_trie(w: u32, eps: f64) -> u32 {
    assert!(eps > 0.0 && eps <= 1.0, "eps must be in (0, 1]");
    let log_log_w = if w <= 2 { 0.0 } else { (w as f64).log2().log2() };
    let raw = log_log_w + (1.0 / eps).log2();
    raw.ceil().max(1.0) as u32
}

/// `signature_bits_probabilistic_trie(w, m / n)`.
pub fn signature_bits_relative_trie(w: u32, n: usize, m: usize) -> u32 {
    assert!(n > 0, "n must be positive");
    let eps = (m as f64) / (n as f64);
    signature_bits_probabilistic_trie(w, eps.clamp(f64::MIN_POSITIVE, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_count_rounds_up() {
        assert_eq!(bucket_count(256, 256), 1);
        assert_eq!(bucket_count(257, 256), 2);
        assert_eq!(bucket_count(0, 256), 0);
    }

    #[test]
    fn width_for_max_value_picks_smallest() {
        assert_eq!(width_for_max_value(0), 8);
        assert_eq!(width_for_max_value(255), 8);
        assert_eq!(width_for_max_value(256), 16);
        assert_eq!(width_for_max_value(70_000), 32);
        assert_eq!(width_for_max_value(u64::MAX), 64);
    }

    #[test]
    fn width_for_delimiter_trie_index_accounts_for_sentinel() {
        // m = 100 -> upper bound 201, fits u8 range? 201 <= 255, so 8.
        assert_eq!(width_for_delimiter_trie_index(100), 8);
        // m = 200 -> upper bound 401, needs 16 bits.
        assert_eq!(width_for_delimiter_trie_index(200), 16);
    }

    #[test]
    fn signature_bits_small_w_has_no_log_log_term() {
        assert_eq!(signature_bits_probabilistic_trie(2, 0.01), 7); // ceil(log2(100))=7
        assert_eq!(signature_bits_probabilistic_trie(1, 0.5), 1);
    }

    #[test]
    fn signature_bits_relative_matches_probabilistic() {
        let direct = signature_bits_probabilistic_trie(128, 10.0 / 1000.0);
        let relative = signature_bits_relative_trie(128, 1000, 10);
        assert_eq!(direct, relative);
    }
}
