//! Similarity bucket map.
//!
//! Letters that score well against each other are merged into groups, so k-mers that
//! differ only by such substitutions share a bucket. The map is a pure function of the
//! substitution matrix and the requested group count; it uses integer arithmetic only,
//! so every machine derives the same buckets from the matrix embedded in an index.

use crate::libs::alphabet::{Alphabet, INVALID_SYMBOL};
use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMap {
    group_of: Vec<u8>,
    size: usize,
}

impl BucketMap {
    /// Every letter is its own bucket; the key base is the full alphabet size.
    pub fn identity(alphabet: &Alphabet) -> Self {
        Self {
            group_of: (0..alphabet.size() as u8).collect(),
            size: alphabet.size(),
        }
    }

    /// Greedily merge the two groups with the highest average pairwise score until
    /// `target` groups remain. Ties go to the pair found first (lowest indices).
    /// The wildcard takes no part and maps to no group.
    pub fn reduce(alphabet: &Alphabet, target: usize) -> Result<Self> {
        let wildcard = alphabet.wildcard();
        let letters: Vec<u8> = (0..alphabet.size() as u8).filter(|&s| s != wildcard).collect();
        if target < 2 || target > letters.len() {
            bail!(
                "Reduced alphabet size must be between 2 and {}, got {}",
                letters.len(),
                target
            );
        }

        let mut groups: Vec<Vec<u8>> = letters.iter().map(|&s| vec![s]).collect();
        while groups.len() > target {
            // (i, j, sum, pairs)
            let mut best: Option<(usize, usize, i64, i64)> = None;
            for i in 0..groups.len() {
                for j in (i + 1)..groups.len() {
                    let mut sum = 0i64;
                    for &a in &groups[i] {
                        for &b in &groups[j] {
                            sum += alphabet.score(a, b) as i64;
                        }
                    }
                    let pairs = (groups[i].len() * groups[j].len()) as i64;
                    let better = match best {
                        None => true,
                        // sum / pairs > best_sum / best_pairs
                        Some((_, _, bs, bp)) => sum * bp > bs * pairs,
                    };
                    if better {
                        best = Some((i, j, sum, pairs));
                    }
                }
            }

            let Some((i, j, _, _)) = best else {
                break;
            };
            let merged = groups.remove(j);
            groups[i].extend(merged);
            groups[i].sort_unstable();
        }

        let mut group_of = vec![INVALID_SYMBOL; alphabet.size()];
        for (g, members) in groups.iter().enumerate() {
            for &s in members {
                group_of[s as usize] = g as u8;
            }
        }

        Ok(Self {
            group_of,
            size: target,
        })
    }

    /// `reduced_size == 0` means no reduction.
    pub fn for_alphabet(alphabet: &Alphabet, reduced_size: usize) -> Result<Self> {
        if reduced_size == 0 {
            Ok(Self::identity(alphabet))
        } else {
            Self::reduce(alphabet, reduced_size)
        }
    }

    /// Number of buckets per key position
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn group(&self, symbol: u8) -> u8 {
        self.group_of[symbol as usize]
    }

    pub fn members(&self, group: u8) -> Vec<u8> {
        (0..self.group_of.len() as u8)
            .filter(|&s| self.group_of[s as usize] == group)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let ab = Alphabet::identity(b"ABC", b'X', 2, -1).unwrap();
        let map = BucketMap::identity(&ab);
        assert_eq!(map.size(), 4);
        assert_eq!(map.group(2), 2);
        assert_eq!(map.members(1), vec![1]);
    }

    #[test]
    fn test_reduce_blosum62() -> anyhow::Result<()> {
        let ab = Alphabet::blosum62();
        let codes = ab.encode(b"IVLX")?;

        // The first merge joins I and V (score 3)
        let map = BucketMap::reduce(ab, 19)?;
        assert_eq!(map.size(), 19);
        assert_eq!(map.group(codes[0]), map.group(codes[1]));
        assert_ne!(map.group(codes[0]), map.group(codes[2]));
        assert_eq!(map.group(codes[3]), INVALID_SYMBOL);

        Ok(())
    }

    #[test]
    fn test_reduce_deterministic() -> anyhow::Result<()> {
        let ab = Alphabet::blosum62();
        let first = BucketMap::reduce(ab, 10)?;
        let second = BucketMap::reduce(ab, 10)?;
        assert_eq!(first, second);

        let covered: usize = (0..10u8).map(|g| first.members(g).len()).sum();
        assert_eq!(covered, 20);
        Ok(())
    }

    #[test]
    fn test_reduce_bounds() {
        let ab = Alphabet::identity(b"ABC", b'X', 2, -1).unwrap();
        assert!(BucketMap::reduce(&ab, 1).is_err());
        assert!(BucketMap::reduce(&ab, 4).is_err());
        assert!(BucketMap::reduce(&ab, 3).is_ok());
    }
}
