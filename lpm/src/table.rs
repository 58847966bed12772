// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Deterministic prefix tables keyed by mask length and network address.
//!
//! [`PrefixTable`] is the lookup structure behind subnet-relation analysis:
//! it detects duplicate addresses on insertion and walks direct
//! subnet/supernet pairs from the most specific prefix upwards. Iteration
//! order is fully deterministic, which the reproducibility of diagnostics
//! depends on.

use crate::prefix::Prefix;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

fn split(prefix: &Prefix) -> (bool, u8, u128) {
    match prefix {
        Prefix::V4(net) => (false, net.prefix_len(), u128::from(u32::from(net.network()))),
        Prefix::V6(net) => (true, net.prefix_len(), u128::from(net.network())),
    }
}

fn mask_bits(v6: bool, len: u8) -> u128 {
    if len == 0 {
        return 0;
    }
    let width: u8 = if v6 { 128 } else { 32 };
    let full = if v6 { u128::MAX } else { (1u128 << 32) - 1 };
    full & (u128::MAX << (width - len))
}

/// A table of prefixes, grouped per address family and mask length.
#[derive(Debug)]
pub struct PrefixTable<T> {
    lens: BTreeMap<(bool, u8), BTreeMap<u128, T>>,
}

impl<T> Default for PrefixTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PrefixTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lens: BTreeMap::new(),
        }
    }

    /// Insert a value under a prefix. If another value is already stored
    /// under the same address, the table is left unchanged and the existing
    /// value is returned.
    pub fn insert(&mut self, prefix: &Prefix, value: T) -> Option<&T> {
        let (v6, len, addr) = split(prefix);
        let slot = self.lens.entry((v6, len)).or_default();
        match slot.entry(addr) {
            Entry::Occupied(occupied) => Some(&*occupied.into_mut()),
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                None
            }
        }
    }

    #[must_use]
    pub fn get(&self, prefix: &Prefix) -> Option<&T> {
        let (v6, len, addr) = split(prefix);
        self.lens.get(&(v6, len)).and_then(|slot| slot.get(&addr))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lens.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lens.values().all(BTreeMap::is_empty)
    }

    /// Visit every direct subnet relation as `work(subnet, supernet)`.
    ///
    /// Prefixes are processed from the most specific mask to the least
    /// specific one; for each prefix the enclosing entry with the longest
    /// mask wins, so only immediate relations are reported. Transitive
    /// relations are reached through the immediate ones.
    pub fn subnet_relation<F>(&self, mut work: F)
    where
        F: FnMut(&T, &T),
    {
        for v6 in [false, true] {
            let lens: Vec<u8> = self
                .lens
                .keys()
                .filter(|(family, _)| *family == v6)
                .map(|(_, len)| *len)
                .collect();
            for (i, &len) in lens.iter().enumerate().rev() {
                // Masks shorter than the current one are supernet candidates.
                let uppers = &lens[..i];
                if uppers.is_empty() {
                    continue;
                }
                let Some(ip_map) = self.lens.get(&(v6, len)) else {
                    continue;
                };
                for (&addr, sub) in ip_map {
                    for &upper in uppers.iter().rev() {
                        let masked = addr & mask_bits(v6, upper);
                        if let Some(big) =
                            self.lens.get(&(v6, upper)).and_then(|m| m.get(&masked))
                        {
                            work(sub, big);
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(prefixes: &[&str]) -> PrefixTable<String> {
        let mut table = PrefixTable::new();
        for p in prefixes {
            assert!(table.insert(&Prefix::from(*p), (*p).to_string()).is_none());
        }
        table
    }

    #[test]
    fn test_duplicate_detection() {
        let mut table = table(&["10.0.0.0/24"]);
        let existing = table.insert(&Prefix::from("10.0.0.0/24"), "dup".to_string());
        assert_eq!(existing, Some(&"10.0.0.0/24".to_string()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_direct_relation_only() {
        let table = table(&["10.0.0.0/8", "10.1.0.0/16", "10.1.1.0/24", "172.16.0.0/12"]);
        let mut seen = Vec::new();
        table.subnet_relation(|sub, big| seen.push((sub.clone(), big.clone())));
        // /24 attaches to /16, not to /8; /12 has no supernet.
        assert_eq!(
            seen,
            vec![
                ("10.1.1.0/24".to_string(), "10.1.0.0/16".to_string()),
                ("10.1.0.0/16".to_string(), "10.0.0.0/8".to_string()),
            ]
        );
    }

    #[test]
    fn test_gap_in_mask_lengths() {
        let table = table(&["10.0.0.0/8", "10.2.3.0/24"]);
        let mut seen = Vec::new();
        table.subnet_relation(|sub, big| seen.push((sub.clone(), big.clone())));
        assert_eq!(
            seen,
            vec![("10.2.3.0/24".to_string(), "10.0.0.0/8".to_string())]
        );
    }

    #[test]
    fn test_families_are_separate() {
        let table = table(&["0.0.0.0/0", "::/0", "10.0.0.0/8", "2001:db8::/32"]);
        let mut seen = Vec::new();
        table.subnet_relation(|sub, big| seen.push((sub.clone(), big.clone())));
        assert_eq!(
            seen,
            vec![
                ("10.0.0.0/8".to_string(), "0.0.0.0/0".to_string()),
                ("2001:db8::/32".to_string(), "::/0".to_string()),
            ]
        );
    }

    #[test]
    fn test_deterministic_order() {
        let a = table(&["10.1.1.0/24", "10.1.0.0/16", "10.0.0.0/8"]);
        let b = table(&["10.0.0.0/8", "10.1.1.0/24", "10.1.0.0/16"]);
        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        a.subnet_relation(|sub, big| seen_a.push((sub.clone(), big.clone())));
        b.subnet_relation(|sub, big| seen_b.push((sub.clone(), big.clone())));
        assert_eq!(seen_a, seen_b);
    }
}
