use crate::libs::alphabet::Alphabet;
use crate::libs::bucket::BucketMap;
use anyhow::{anyhow, bail, Result};
use std::fmt;

/// Longest window a spaced pattern may cover
pub const MAX_SPAN: usize = 32;

/// A boolean mask over a k-mer window.
///
/// Set positions contribute to the key; cleared positions are skipped but still
/// consume sequence positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacedPattern {
    mask: Vec<bool>,
}

impl SpacedPattern {
    pub fn contiguous(k: usize) -> Result<Self> {
        Self::from_mask(vec![true; k])
    }

    /// Parse a pattern such as `1101011`.
    pub fn parse(pattern: &str) -> Result<Self> {
        let mask = pattern
            .chars()
            .map(|c| match c {
                '1' => Ok(true),
                '0' => Ok(false),
                _ => Err(anyhow!("Invalid character '{}' in spaced pattern {}", c, pattern)),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_mask(mask)
    }

    /// Inverse of [`SpacedPattern::bits`]
    pub fn from_bits(bits: u64, span: usize) -> Result<Self> {
        if span == 0 || span > MAX_SPAN {
            bail!("Spaced pattern span must be between 1 and {}, got {}", MAX_SPAN, span);
        }
        if span < 64 && bits >> span != 0 {
            bail!("Spaced pattern bits {:#x} exceed span {}", bits, span);
        }
        Self::from_mask((0..span).map(|i| bits >> i & 1 == 1).collect())
    }

    fn from_mask(mask: Vec<bool>) -> Result<Self> {
        if mask.is_empty() || mask.len() > MAX_SPAN {
            bail!(
                "Spaced pattern span must be between 1 and {}, got {}",
                MAX_SPAN,
                mask.len()
            );
        }
        if !mask[0] || !mask[mask.len() - 1] {
            bail!("Spaced pattern must start and end with a set position");
        }
        Ok(Self { mask })
    }

    /// Window length, the `k` of the index
    pub fn span(&self) -> usize {
        self.mask.len()
    }

    /// Number of contributing positions
    pub fn weight(&self) -> usize {
        self.mask.iter().filter(|&&b| b).count()
    }

    pub fn is_contiguous(&self) -> bool {
        self.mask.iter().all(|&b| b)
    }

    /// Bit `i` set when offset `i` contributes
    pub fn bits(&self) -> u64 {
        self.mask
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| if b { acc | 1 << i } else { acc })
    }

    pub fn offsets(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
            .collect()
    }
}

impl fmt::Display for SpacedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.mask {
            f.write_str(if b { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// K-mer parameters, stored in every index header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerParams {
    pub pattern: SpacedPattern,
    /// Similarity bucket aggressiveness: letters are merged into this many groups.
    /// 0 disables the bucket map.
    pub reduced_size: usize,
}

impl Default for KmerParams {
    fn default() -> Self {
        Self {
            pattern: SpacedPattern {
                mask: vec![true; 6],
            },
            reduced_size: 0,
        }
    }
}

/// Turns symbol sequences into `(position, bucket)` streams.
#[derive(Debug, Clone)]
pub struct Extractor {
    alphabet: Alphabet,
    params: KmerParams,
    buckets: BucketMap,
    offsets: Vec<usize>,
    base: u64,
}

impl Extractor {
    pub fn new(alphabet: Alphabet, params: KmerParams) -> Result<Self> {
        let buckets = BucketMap::for_alphabet(&alphabet, params.reduced_size)?;
        let base = buckets.size() as u64;
        let weight = params.pattern.weight();
        if base.checked_pow(weight as u32).is_none() {
            bail!(
                "{} positions over {} buckets per position do not fit a 64-bit key",
                weight,
                base
            );
        }
        let offsets = params.pattern.offsets();

        Ok(Self {
            alphabet,
            params,
            buckets,
            offsets,
            base,
        })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn params(&self) -> &KmerParams {
        &self.params
    }

    pub fn buckets(&self) -> &BucketMap {
        &self.buckets
    }

    pub fn span(&self) -> usize {
        self.params.pattern.span()
    }

    /// Size of the key space
    pub fn num_keys(&self) -> u64 {
        self.base.pow(self.offsets.len() as u32)
    }

    /// Number of windows of a sequence of `len` symbols, wildcards included.
    pub fn num_windows(&self, len: usize) -> usize {
        (len + 1).saturating_sub(self.span())
    }

    /// Bucket of the window starting at `pos`.
    ///
    /// `None` when the window runs past the end, or holds a wildcard or a symbol
    /// outside the alphabet anywhere in its span.
    #[inline]
    pub fn bucket_at(&self, symbols: &[u8], pos: usize) -> Option<u64> {
        let window = symbols.get(pos..pos.checked_add(self.span())?)?;
        let wildcard = self.alphabet.wildcard();
        if window
            .iter()
            .any(|&s| s == wildcard || !self.alphabet.is_valid(s))
        {
            return None;
        }

        let mut key = 0u64;
        for &off in &self.offsets {
            key = key * self.base + self.buckets.group(window[off]) as u64;
        }
        Some(key)
    }

    /// Lazy `(position, bucket)` stream in ascending position order.
    pub fn kmers<'a>(&'a self, symbols: &'a [u8]) -> KmerIter<'a> {
        KmerIter {
            extractor: self,
            symbols,
            pos: 0,
            end: self.num_windows(symbols.len()),
        }
    }

    /// Substitution score of two windows over the full span.
    #[inline]
    pub fn window_score(&self, query: &[u8], qpos: usize, target: &[u8], tpos: usize) -> i32 {
        let span = self.span();
        match (query.get(qpos..qpos + span), target.get(tpos..tpos + span)) {
            (Some(q), Some(t)) => q
                .iter()
                .zip(t)
                .map(|(&a, &b)| self.alphabet.score(a, b))
                .sum(),
            _ => 0,
        }
    }

    /// Human-readable form of a bucket: one letter per contributing position, the
    /// first member of its group, `.` for skipped positions.
    pub fn decode(&self, mut bucket: u64) -> String {
        let mut groups = vec![0u8; self.offsets.len()];
        for g in groups.iter_mut().rev() {
            *g = (bucket % self.base) as u8;
            bucket /= self.base;
        }

        let mut word = vec![b'.'; self.span()];
        for (&off, &g) in self.offsets.iter().zip(&groups) {
            let letter = match self.buckets.members(g).first() {
                Some(&s) => self.alphabet.letter(s),
                None => b'?',
            };
            word[off] = letter;
        }
        String::from_utf8_lossy(&word).to_string()
    }
}

/// Iterator returned by [`Extractor::kmers`]. Clone it to restart.
#[derive(Debug, Clone)]
pub struct KmerIter<'a> {
    extractor: &'a Extractor,
    symbols: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Iterator for KmerIter<'a> {
    type Item = (u32, u64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.end {
            let pos = self.pos;
            self.pos += 1;
            if let Some(bucket) = self.extractor.bucket_at(self.symbols, pos) {
                return Some((pos as u32, bucket));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end.saturating_sub(self.pos)))
    }
}
