use bit_vec::BitVec;
use seahash::hash;

/// Bloom filter over record ids. Answers "definitely absent" without touching
/// the index; deleted ids stay set until the next compaction rebuilds it.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: BitVec,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes the filter for `expected_items` at the given false positive rate.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected_items = expected_items.max(1);

        // m = -(n * ln(p)) / (ln(2)^2)
        let ln2 = 2.0f64.ln();
        let m = -((expected_items as f64 * false_positive_rate.ln()) / (ln2 * ln2));

        // k = (m / n) * ln(2)
        let k = (m / expected_items as f64) * ln2;

        Self {
            bits: BitVec::from_elem(m.ceil().max(8.0) as usize, false),
            num_hashes: k.ceil().max(1.0) as u32,
        }
    }

    pub fn insert(&mut self, id: u128) {
        let m = self.bits.len() as u64;
        for idx in self.positions(id, m) {
            self.bits.set(idx, true);
        }
    }

    /// `false` means the id was never inserted; `true` means it might have been.
    pub fn might_contain(&self, id: u128) -> bool {
        let m = self.bits.len() as u64;
        self.positions(id, m).all(|idx| self.bits.get(idx).unwrap_or(false))
    }

    // Double hashing: g_i(x) = h1(x) + i * h2(x)
    fn positions(&self, id: u128, m: u64) -> impl Iterator<Item = usize> {
        let h1 = hash(&id.to_le_bytes());
        let h2 = h1.wrapping_add(0x9E3779B97F4A7C15);
        (0..self.num_hashes).map(move |i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) % m) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_ids_are_always_found() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        let ids: Vec<u128> = (0..1_000u128).map(|i| i * 7_919 + 13).collect();
        for id in &ids {
            filter.insert(*id);
        }
        assert!(ids.iter().all(|id| filter.might_contain(*id)));
    }

    #[test]
    fn false_positive_rate_stays_near_target() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for id in 0..1_000u128 {
            filter.insert(id);
        }
        let false_positives = (1_000_000..1_010_000u128).filter(|id| filter.might_contain(*id)).count();
        // 1% target over 10k probes, with generous slack
        assert!(false_positives < 500, "too many false positives: {}", false_positives);
    }

    #[test]
    fn empty_filter_contains_nothing() {
        let filter = BloomFilter::new(0, 0.01);
        assert!(!filter.might_contain(1));
    }
}
