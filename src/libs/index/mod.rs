//! Inverted k-mer index: bucket id -> posting list of `(sequence id, position)`.
//!
//! Two implementations share the [`KmerIndex`] trait: [`MemoryIndex`], built and
//! kept in memory, and [`MappedIndex`], a memory-mapped persisted file. The matcher
//! works over either one and must give identical results.

pub mod builder;
pub mod external;
pub mod format;
pub mod mapped;
pub mod memory;

pub use builder::{BuildOptions, IndexBuilder, IndexSummary};
pub use mapped::MappedIndex;
pub use memory::MemoryIndex;

use crate::libs::alphabet::Alphabet;
use crate::libs::kmer::Extractor;

/// Size of a posting as stored in spill runs
pub const POSTING_RECORD_LEN: usize = 16;

/// One k-mer occurrence.
///
/// Field order gives the sort order of the merge: bucket, then sequence, then position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Posting {
    pub bucket: u64,
    pub seq_id: u32,
    pub pos: u32,
}

impl Posting {
    pub fn to_bytes(&self) -> [u8; POSTING_RECORD_LEN] {
        let mut buf = [0u8; POSTING_RECORD_LEN];
        buf[0..8].copy_from_slice(&self.bucket.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seq_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.pos.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; POSTING_RECORD_LEN]) -> Self {
        Self {
            bucket: format::le_u64(&buf[0..8]),
            seq_id: format::le_u32(&buf[8..12]),
            pos: format::le_u32(&buf[12..16]),
        }
    }
}

/// Read-only view shared by all search workers.
pub trait KmerIndex: Sync {
    /// The extractor the index was built with; queries must use the same one.
    fn extractor(&self) -> &Extractor;

    fn num_seqs(&self) -> usize;

    /// Number of non-empty buckets
    fn num_buckets(&self) -> usize;

    fn num_postings(&self) -> usize;

    /// Occurrences of `bucket`, ordered by `(sequence id, position)`.
    fn postings(&self, bucket: u64) -> Postings<'_>;

    fn seq_symbols(&self, id: u32) -> Option<&[u8]>;

    fn seq_name(&self, id: u32) -> Option<&str>;

    fn seq_len(&self, id: u32) -> Option<usize> {
        self.seq_symbols(id).map(|s| s.len())
    }

    fn alphabet(&self) -> &Alphabet {
        self.extractor().alphabet()
    }
}

/// Posting list iterator yielding `(sequence id, position)`.
#[derive(Debug, Clone)]
pub enum Postings<'a> {
    Memory(std::slice::Iter<'a, (u32, u32)>),
    /// Little-endian `u32` pairs straight from the mapping
    Mapped(std::slice::ChunksExact<'a, u8>),
}

impl<'a> Postings<'a> {
    pub fn empty() -> Self {
        let none: &'a [(u32, u32)] = &[];
        Postings::Memory(none.iter())
    }
}

impl<'a> Iterator for Postings<'a> {
    type Item = (u32, u32);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Postings::Memory(iter) => iter.next().copied(),
            Postings::Mapped(chunks) => chunks
                .next()
                .map(|c| (format::le_u32(&c[0..4]), format::le_u32(&c[4..8]))),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self {
            Postings::Memory(iter) => iter.len(),
            Postings::Mapped(chunks) => chunks.len(),
        };
        (n, Some(n))
    }
}

impl<'a> ExactSizeIterator for Postings<'a> {}
