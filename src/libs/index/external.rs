//! Bounded-memory posting sort.
//!
//! Sorted chunks are spilled to anonymous temporary files as fixed 16-byte records,
//! then merged back in `(bucket, seq_id, pos)` order with a k-way heap merge.

use super::{Posting, POSTING_RECORD_LEN};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct ExternalSorter {
    dir: PathBuf,
    runs: Vec<File>,
    spilled: u64,
}

impl ExternalSorter {
    /// Spill files are created in `dir` and removed when dropped.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            runs: vec![],
            spilled: 0,
        }
    }

    /// Write one run. `chunk` must already be sorted.
    pub fn push_run(&mut self, chunk: &[Posting]) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        debug_assert!(chunk.windows(2).all(|w| w[0] <= w[1]));

        let file = tempfile::tempfile_in(&self.dir)?;
        let mut writer = BufWriter::new(file);
        for p in chunk {
            writer.write_all(&p.to_bytes())?;
        }
        let mut file = writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;

        self.spilled += chunk.len() as u64;
        self.runs.push(file);
        log::debug!("Spilled run {} with {} postings", self.runs.len(), chunk.len());
        Ok(())
    }

    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    /// Postings written so far, duplicates included
    pub fn num_spilled(&self) -> u64 {
        self.spilled
    }

    /// Merge all runs into one sorted, de-duplicated stream.
    pub fn merge(self) -> io::Result<MergeIter> {
        let mut readers: Vec<RunReader> = self
            .runs
            .into_iter()
            .map(|f| RunReader {
                inner: BufReader::new(f),
            })
            .collect();

        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (i, reader) in readers.iter_mut().enumerate() {
            if let Some(p) = reader.next_posting()? {
                heap.push(Reverse((p, i)));
            }
        }

        Ok(MergeIter {
            readers,
            heap,
            last: None,
        })
    }
}

struct RunReader {
    inner: BufReader<File>,
}

impl RunReader {
    fn next_posting(&mut self) -> io::Result<Option<Posting>> {
        let mut buf = [0u8; POSTING_RECORD_LEN];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => Ok(Some(Posting::from_bytes(&buf))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub struct MergeIter {
    readers: Vec<RunReader>,
    heap: BinaryHeap<Reverse<(Posting, usize)>>,
    last: Option<Posting>,
}

impl MergeIter {
    fn pop(&mut self) -> io::Result<Option<Posting>> {
        let Some(Reverse((p, i))) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(next) = self.readers[i].next_posting()? {
            self.heap.push(Reverse((next, i)));
        }
        Ok(Some(p))
    }
}

impl Iterator for MergeIter {
    type Item = io::Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.pop() {
                Ok(Some(p)) => {
                    if self.last == Some(p) {
                        continue;
                    }
                    self.last = Some(p);
                    return Some(Ok(p));
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(bucket: u64, seq_id: u32, pos: u32) -> Posting {
        Posting { bucket, seq_id, pos }
    }

    #[test]
    fn test_merge_runs() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let mut sorter = ExternalSorter::new(dir.path());
        sorter.push_run(&[p(1, 0, 0), p(3, 0, 2), p(5, 1, 0)])?;
        sorter.push_run(&[])?;
        sorter.push_run(&[p(0, 2, 1), p(3, 0, 2), p(3, 0, 9)])?;
        sorter.push_run(&[p(2, 1, 1)])?;
        assert_eq!(sorter.num_runs(), 3);
        assert_eq!(sorter.num_spilled(), 7);

        let merged = sorter.merge()?.collect::<io::Result<Vec<_>>>()?;
        assert_eq!(
            merged,
            vec![
                p(0, 2, 1),
                p(1, 0, 0),
                p(2, 1, 1),
                p(3, 0, 2),
                p(3, 0, 9),
                p(5, 1, 0)
            ]
        );
        Ok(())
    }

    #[test]
    fn test_merge_empty() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let sorter = ExternalSorter::new(dir.path());
        assert_eq!(sorter.merge()?.count(), 0);
        Ok(())
    }
}
