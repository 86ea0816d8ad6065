use rustc_hash::FxHashMap;

use crate::compute::{Aggregate, Tenths};

/// A per-worker mapping from key bytes to their [`Aggregate`].
///
/// Each worker owns one exclusively while parsing, then hands it to the merger, so nothing here
/// needs to be thread-safe beyond being `Send`.
pub trait AggregateStore: Default + Send {
    fn record(&mut self, key: &[u8], value: Tenths);

    /// Absorbs another store. Per-key combination is [`Aggregate::merge`], so the result doesn't
    /// depend on which partial was merged into which.
    fn merge(&mut self, other: Self);

    fn get(&self, key: &[u8]) -> Option<&Aggregate>;

    // distinct keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every key in ascending byte order.
    fn for_each_sorted<F: FnMut(&[u8], &Aggregate)>(&self, f: F);

    fn into_sorted(self) -> Vec<(Box<[u8]>, Aggregate)> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each_sorted(|k, v| out.push((k.into(), *v)));
        out
    }
}

pub type AggMap = FxHashMap<Box<[u8]>, Aggregate>;

// cheap inserts, but the keys need a full sort before output
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HashStore {
    totals: AggMap,
}

impl AggregateStore for HashStore {
    #[inline]
    fn record(&mut self, key: &[u8], value: Tenths) {
        // look up by borrowed key first so a hit never allocates. only a brand new key gets boxed.
        match self.totals.get_mut(key) {
            Some(agg) => agg.insert(value),
            None => {
                self.totals.insert(key.into(), Aggregate::new(value));
            }
        }
    }

    fn merge(&mut self, other: Self) {
        // keep the bigger map as the accumulator so we move the fewest entries
        let mut other = other;
        if other.totals.len() > self.totals.len() {
            std::mem::swap(self, &mut other);
        }
        for (name, agg) in other.totals {
            self.totals.entry(name).or_default().merge(agg);
        }
    }

    fn get(&self, key: &[u8]) -> Option<&Aggregate> {
        self.totals.get(key)
    }

    fn len(&self) -> usize {
        self.totals.len()
    }

    fn for_each_sorted<F: FnMut(&[u8], &Aggregate)>(&self, mut f: F) {
        let mut result = self.totals.iter().collect::<Vec<_>>();
        result.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (k, v) in result {
            f(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::process_chunk;
    use crate::trie::Trie;
    use proptest::prelude::*;

    fn store<S: AggregateStore>(input: &str) -> S {
        let mut out = S::default();
        process_chunk(input.as_bytes(), &mut out).unwrap();
        out
    }

    #[test]
    fn test_merge_combines_shared_keys() {
        let mut a: HashStore = store("A;1.0\nB;-2.0\n");
        let b: HashStore = store("B;4.0\nC;0.5\n");
        a.merge(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(b"A"), Some(&Aggregate::new(10)));
        assert_eq!(
            a.get(b"B"),
            Some(&Aggregate {
                count: 2,
                sum: 20,
                min: -20,
                max: 40
            })
        );
        assert_eq!(a.get(b"C"), Some(&Aggregate::new(5)));
    }

    #[test]
    fn test_merge_with_empty() {
        let mut a = HashStore::default();
        a.merge(store("A;1.0\n"));
        assert_eq!(a.len(), 1);
        let before = a.clone();
        a.merge(HashStore::default());
        assert_eq!(a, before);
    }

    #[test]
    fn test_sorted_iteration_is_bytewise() {
        let s: HashStore = store("b;1.0\nB;1.0\na;1.0\nab;1.0\nÅ;1.0\n;1.0\n");
        let keys = s
            .into_sorted()
            .into_iter()
            .map(|(k, _)| String::from_utf8(k.into_vec()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["", "B", "a", "ab", "b", "Å"]);
    }

    fn records() -> impl Strategy<Value = Vec<(String, i32)>> {
        prop::collection::vec(("[a-cé]{0,3}", -999i32..=999), 0..40)
    }

    fn render(records: &[(String, i32)]) -> String {
        records
            .iter()
            .map(|(k, v)| {
                let sign = if *v < 0 { "-" } else { "" };
                format!("{k};{sign}{}.{}\n", v.abs() / 10, v.abs() % 10)
            })
            .collect()
    }

    // merge(merge(a, b), c), merge(a, merge(b, c)) and merge(b, merge(a, c)) must all match a
    // single pass over the concatenated input, key order and key count included
    fn check_merge_orders<S: AggregateStore>(
        a: &str,
        b: &str,
        c: &str,
    ) -> Result<(), TestCaseError> {
        let whole: S = store(&format!("{a}{b}{c}"));

        let mut ab_c: S = store(a);
        ab_c.merge(store(b));
        ab_c.merge(store(c));

        let mut bc: S = store(b);
        bc.merge(store(c));
        let mut a_bc: S = store(a);
        a_bc.merge(bc);

        let mut ac: S = store(a);
        ac.merge(store(c));
        let mut b_ac: S = store(b);
        b_ac.merge(ac);

        for merged in [ab_c, a_bc, b_ac] {
            prop_assert_eq!(merged.len(), whole.len());
            let mut sorted = Vec::new();
            merged.for_each_sorted(|k, v| sorted.push((k.to_vec(), *v)));
            let mut expected = Vec::new();
            whole.for_each_sorted(|k, v| expected.push((k.to_vec(), *v)));
            prop_assert_eq!(sorted, expected);
        }
        Ok(())
    }

    proptest! {
        /// Property: merge order of three hash partials never changes the result
        #[test]
        fn prop_hash_merge_is_associative_and_commutative(
            a in records(),
            b in records(),
            c in records(),
        ) {
            check_merge_orders::<HashStore>(&render(&a), &render(&b), &render(&c))?;
        }

        /// Property: same for tries, whose merge takes shortcuts when one side is empty
        #[test]
        fn prop_trie_merge_is_associative_and_commutative(
            a in records(),
            b in records(),
            c in records(),
        ) {
            check_merge_orders::<Trie>(&render(&a), &render(&b), &render(&c))?;
        }

        /// Property: hash and trie stores agree on every key and on key order
        #[test]
        fn prop_trie_matches_hash(parts in prop::collection::vec(records(), 1..5)) {
            let mut hash = HashStore::default();
            let mut trie = Trie::default();
            for part in &parts {
                let input = render(part);
                hash.merge(store(&input));
                trie.merge(store(&input));
            }
            prop_assert_eq!(hash.len(), trie.len());
            prop_assert_eq!(hash.into_sorted(), trie.into_sorted());
        }
    }
}
