use super::external::ExternalSorter;
use super::format::write_index;
pub use super::format::IndexSummary;
use super::memory::MemoryIndex;
use super::Posting;
use crate::libs::error::IndexError;
use crate::libs::kmer::Extractor;
use crate::libs::seqdb::{SeqDb, SeqEntry};
use rayon::prelude::*;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Postings held in memory at once; larger collections are sorted in spilled runs
    pub max_postings_in_memory: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            // 16 bytes each, about 1 GiB
            max_postings_in_memory: 1 << 26,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexBuilder {
    extractor: Extractor,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(extractor: Extractor, options: BuildOptions) -> Self {
        Self { extractor, options }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Upper bound of the postings of `entries`; wildcard windows are counted too.
    pub fn estimate(&self, entries: &[SeqEntry]) -> usize {
        entries
            .iter()
            .map(|e| self.extractor.num_windows(e.len()))
            .sum()
    }

    fn seq_postings(&self, entry: &SeqEntry) -> Vec<Posting> {
        let seq_id = entry.id();
        self.extractor
            .kmers(entry.symbols())
            .map(|(pos, bucket)| Posting {
                bucket,
                seq_id,
                pos,
            })
            .collect()
    }

    /// Sorted, de-duplicated postings of `entries`.
    pub fn extract_postings(&self, entries: &[SeqEntry]) -> Vec<Posting> {
        let mut postings: Vec<Posting> = entries
            .par_iter()
            .flat_map_iter(|e| self.seq_postings(e))
            .collect();
        postings.par_sort_unstable();
        postings.dedup();
        postings
    }

    pub fn build_in_memory(&self, db: &SeqDb) -> MemoryIndex {
        let postings = self.extract_postings(db.entries());
        MemoryIndex::from_sorted(self.extractor.clone(), db.clone(), &postings)
    }

    /// Write the persisted index of `db` to `path`.
    ///
    /// Nothing appears at `path` unless the whole file was written.
    pub fn write<P: AsRef<Path>>(&self, db: &SeqDb, path: P) -> Result<IndexSummary, IndexError> {
        let path = path.as_ref();
        let estimate = self.estimate(db.entries());

        if estimate <= self.options.max_postings_in_memory {
            let postings = self.extract_postings(db.entries());
            log::info!(
                "Sorted {} postings of {} sequences in memory",
                postings.len(),
                db.len()
            );
            return write_index(path, &self.extractor, db, postings.into_iter().map(Ok));
        }

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        let mut sorter = ExternalSorter::new(&dir);
        for chunk in self.chunks(db.entries()) {
            let postings = self.extract_postings(chunk);
            sorter.push_run(&postings)?;
        }
        log::info!(
            "Sorted {} postings of {} sequences in {} runs",
            sorter.num_spilled(),
            db.len(),
            sorter.num_runs()
        );

        write_index(path, &self.extractor, db, sorter.merge()?)
    }

    /// Consecutive groups of sequences whose estimated postings fit the budget.
    /// A sequence larger than the budget forms a chunk of its own.
    fn chunks<'a>(&self, entries: &'a [SeqEntry]) -> Vec<&'a [SeqEntry]> {
        let budget = self.options.max_postings_in_memory.max(1);
        let mut chunks = vec![];
        let mut start = 0;
        let mut size = 0;
        for (i, e) in entries.iter().enumerate() {
            let n = self.extractor.num_windows(e.len());
            if size > 0 && size + n > budget {
                chunks.push(&entries[start..i]);
                start = i;
                size = 0;
            }
            size += n;
        }
        if start < entries.len() {
            chunks.push(&entries[start..]);
        }
        chunks
    }
}
