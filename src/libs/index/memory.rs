use super::{KmerIndex, Posting, Postings};
use crate::libs::kmer::Extractor;
use crate::libs::seqdb::SeqDb;

/// Index kept in memory, in the same shape as the persisted one: a sorted bucket
/// table pointing into one contiguous posting array.
#[derive(Debug, Clone)]
pub struct MemoryIndex {
    extractor: Extractor,
    buckets: Vec<u64>,
    starts: Vec<usize>,
    entries: Vec<(u32, u32)>,
    db: SeqDb,
}

impl MemoryIndex {
    /// `postings` must be sorted and free of duplicates.
    pub fn from_sorted(extractor: Extractor, db: SeqDb, postings: &[Posting]) -> Self {
        let mut buckets = vec![];
        let mut starts = vec![];
        let mut entries = Vec::with_capacity(postings.len());

        for p in postings {
            if buckets.last() != Some(&p.bucket) {
                buckets.push(p.bucket);
                starts.push(entries.len());
            }
            entries.push((p.seq_id, p.pos));
        }
        starts.push(entries.len());

        Self {
            extractor,
            buckets,
            starts,
            entries,
            db,
        }
    }

    pub fn db(&self) -> &SeqDb {
        &self.db
    }

    /// Non-empty buckets in ascending order with their posting counts
    pub fn bucket_counts(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, self.starts[i + 1] - self.starts[i]))
    }
}

impl KmerIndex for MemoryIndex {
    fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    fn num_seqs(&self) -> usize {
        self.db.len()
    }

    fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    fn num_postings(&self) -> usize {
        self.entries.len()
    }

    fn postings(&self, bucket: u64) -> Postings<'_> {
        match self.buckets.binary_search(&bucket) {
            Ok(i) => Postings::Memory(self.entries[self.starts[i]..self.starts[i + 1]].iter()),
            Err(_) => Postings::empty(),
        }
    }

    fn seq_symbols(&self, id: u32) -> Option<&[u8]> {
        self.db.get(id).map(|e| e.symbols())
    }

    fn seq_name(&self, id: u32) -> Option<&str> {
        self.db.get(id).map(|e| e.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::alphabet::Alphabet;
    use crate::libs::kmer::{KmerParams, SpacedPattern};

    #[test]
    fn test_lookup() -> anyhow::Result<()> {
        let ab = Alphabet::identity(b"ABC", b'X', 2, -1)?;
        let params = KmerParams {
            pattern: SpacedPattern::contiguous(2)?,
            reduced_size: 0,
        };
        let extractor = Extractor::new(ab.clone(), params)?;
        let (db, _) = SeqDb::from_texts(&ab, vec![("t0", &b"AAB"[..])]);

        let postings = vec![
            Posting { bucket: 0, seq_id: 0, pos: 0 },
            Posting { bucket: 1, seq_id: 0, pos: 1 },
        ];
        let index = MemoryIndex::from_sorted(extractor, db, &postings);

        assert_eq!(index.num_buckets(), 2);
        assert_eq!(index.num_postings(), 2);
        assert_eq!(index.postings(1).collect::<Vec<_>>(), vec![(0, 1)]);
        assert_eq!(index.postings(7).count(), 0);
        assert_eq!(index.seq_name(0), Some("t0"));
        assert_eq!(index.seq_len(0), Some(3));
        assert_eq!(index.seq_symbols(1), None);
        assert_eq!(index.bucket_counts().collect::<Vec<_>>(), vec![(0, 1), (1, 1)]);
        Ok(())
    }
}
