use super::format::{
    IndexHeader, Sections, BUCKET_RECORD_LEN, POSTING_LEN, SEQ_RECORD_LEN,
};
use super::{KmerIndex, Postings};
use crate::libs::alphabet::Alphabet;
use crate::libs::error::IndexError;
use crate::libs::kmer::{Extractor, KmerParams, SpacedPattern};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// Read-only persisted index backed by a memory mapping.
///
/// Sections are never deserialized; every access goes through a bounds-checked
/// slice of the mapping.
pub struct MappedIndex {
    path: PathBuf,
    mmap: Mmap,
    header: IndexHeader,
    sections: Sections,
    extractor: Extractor,
}

impl std::fmt::Debug for MappedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedIndex")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeqRecord {
    len: u64,
    sym_offset: u64,
    name_offset: u64,
    name_len: u64,
}

impl MappedIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // The file is never modified in place; writers replace it by rename
        let mmap = unsafe { Mmap::map(&file)? };

        let header = IndexHeader::decode(&mmap, path)?;
        let sections = header.sections()?;
        if mmap.len() as u64 != sections.end {
            return Err(IndexError::Truncated {
                expected: sections.end,
                found: mmap.len() as u64,
            });
        }

        let alphabet = Alphabet::new(
            &header.letters,
            header.matrix.clone(),
            u8::try_from(header.wildcard)
                .map_err(|_| IndexError::Corrupt(format!("wildcard {}", header.wildcard)))?,
        )
        .map_err(|e| IndexError::Corrupt(e.to_string()))?;
        let pattern = SpacedPattern::from_bits(header.mask, header.span as usize)
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;
        let params = KmerParams {
            pattern,
            reduced_size: header.reduced_size as usize,
        };
        let extractor =
            Extractor::new(alphabet, params).map_err(|e| IndexError::Corrupt(e.to_string()))?;

        let index = Self {
            path: path.to_path_buf(),
            mmap,
            header,
            sections,
            extractor,
        };
        index.check_bucket_table()?;
        index.check_seq_table()?;
        index.check_checksum()?;
        index.check_postings()?;

        log::debug!(
            "Mapped {}: {} sequences, {} buckets, {} postings",
            index.path.display(),
            index.header.n_seqs,
            index.header.n_buckets,
            index.header.n_postings
        );
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Fail with `ParamMismatch` when `params` would extract different keys than
    /// the ones stored in the index.
    pub fn check_params(&self, params: &KmerParams) -> Result<(), IndexError> {
        let stored = self.extractor.params();
        if stored.pattern != params.pattern {
            return Err(IndexError::ParamMismatch(format!(
                "index pattern {}, requested {}",
                stored.pattern, params.pattern
            )));
        }
        if stored.reduced_size != params.reduced_size {
            return Err(IndexError::ParamMismatch(format!(
                "index reduced alphabet size {}, requested {}",
                stored.reduced_size, params.reduced_size
            )));
        }
        Ok(())
    }

    /// Recompute the checksum and check every posting against the sequence table.
    ///
    /// `open` already runs these checks; this repeats them on the live mapping.
    pub fn verify(&self) -> Result<(), IndexError> {
        self.check_checksum()?;
        self.check_postings()
    }

    /// Non-empty buckets in ascending order with their posting counts
    pub fn bucket_counts(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.header.n_buckets as usize).filter_map(move |i| {
            self.bucket_record(i).ok().map(|(b, _, n)| (b, n))
        })
    }

    fn slice(&self, range: Range<u64>) -> Result<&[u8], IndexError> {
        let start = usize::try_from(range.start)
            .map_err(|_| IndexError::Corrupt("offset overflow".to_string()))?;
        let end = usize::try_from(range.end)
            .map_err(|_| IndexError::Corrupt("offset overflow".to_string()))?;
        self.mmap.get(start..end).ok_or_else(|| {
            IndexError::Corrupt(format!("range {}..{} outside the file", start, end))
        })
    }

    fn bucket_record(&self, i: usize) -> Result<(u64, u64, u64), IndexError> {
        let start = self.sections.table + i as u64 * BUCKET_RECORD_LEN;
        let rec = self.slice(start..start + BUCKET_RECORD_LEN)?;
        Ok((
            super::format::le_u64(&rec[0..8]),
            super::format::le_u64(&rec[8..16]),
            super::format::le_u64(&rec[16..24]),
        ))
    }

    fn seq_record(&self, id: u64) -> Result<SeqRecord, IndexError> {
        let start = self.sections.seqs + id * SEQ_RECORD_LEN;
        let rec = self.slice(start..start + SEQ_RECORD_LEN)?;
        Ok(SeqRecord {
            len: super::format::le_u64(&rec[0..8]),
            sym_offset: super::format::le_u64(&rec[8..16]),
            name_offset: super::format::le_u64(&rec[16..24]),
            name_len: super::format::le_u64(&rec[24..32]),
        })
    }

    fn check_bucket_table(&self) -> Result<(), IndexError> {
        let num_keys = self.extractor.num_keys();
        let mut expected_first = 0u64;
        let mut prev: Option<u64> = None;
        for i in 0..self.header.n_buckets as usize {
            let (bucket, first, count) = self.bucket_record(i)?;
            if prev.is_some_and(|p| bucket <= p) {
                return Err(IndexError::Corrupt(format!(
                    "bucket table not sorted at entry {}",
                    i
                )));
            }
            if bucket >= num_keys {
                return Err(IndexError::Corrupt(format!(
                    "bucket {} outside the key space {}",
                    bucket, num_keys
                )));
            }
            if first != expected_first || count == 0 {
                return Err(IndexError::Corrupt(format!(
                    "bucket table entry {} is not contiguous",
                    i
                )));
            }
            expected_first = first
                .checked_add(count)
                .ok_or_else(|| IndexError::Corrupt("posting count overflow".to_string()))?;
            prev = Some(bucket);
        }
        if expected_first != self.header.n_postings {
            return Err(IndexError::Corrupt(format!(
                "bucket table covers {} postings, header says {}",
                expected_first, self.header.n_postings
            )));
        }
        Ok(())
    }

    fn check_seq_table(&self) -> Result<(), IndexError> {
        if self.header.n_seqs > u32::MAX as u64 + 1 {
            return Err(IndexError::Corrupt(format!(
                "{} sequences",
                self.header.n_seqs
            )));
        }
        let mut sym_offset = 0u64;
        let mut name_offset = 0u64;
        for id in 0..self.header.n_seqs {
            let rec = self.seq_record(id)?;
            if rec.sym_offset != sym_offset || rec.name_offset != name_offset {
                return Err(IndexError::Corrupt(format!(
                    "sequence record {} is not contiguous",
                    id
                )));
            }
            sym_offset = sym_offset
                .checked_add(rec.len)
                .ok_or_else(|| IndexError::Corrupt("symbol length overflow".to_string()))?;
            name_offset = name_offset
                .checked_add(rec.name_len)
                .ok_or_else(|| IndexError::Corrupt("name length overflow".to_string()))?;
            if sym_offset > self.header.symbols_len || name_offset > self.header.names_len {
                return Err(IndexError::Corrupt(format!(
                    "sequence record {} runs past its blob",
                    id
                )));
            }

            let name = self.slice(
                self.sections.names + rec.name_offset
                    ..self.sections.names + rec.name_offset + rec.name_len,
            )?;
            if std::str::from_utf8(name).is_err() {
                return Err(IndexError::Corrupt(format!(
                    "name of sequence {} is not UTF-8",
                    id
                )));
            }
        }
        if sym_offset != self.header.symbols_len || name_offset != self.header.names_len {
            return Err(IndexError::Corrupt(
                "sequence table does not cover the blobs".to_string(),
            ));
        }

        let size = self.extractor.alphabet().size();
        let symbols = self.slice(self.sections.symbols..self.sections.names)?;
        if let Some(p) = symbols.iter().position(|&s| s as usize >= size) {
            return Err(IndexError::Corrupt(format!(
                "symbol {} at blob offset {} is outside the alphabet",
                symbols[p], p
            )));
        }
        Ok(())
    }

    fn check_checksum(&self) -> Result<(), IndexError> {
        let body = self.slice(self.sections.table..self.sections.end)?;
        let checksum = xxh3_64(body);
        if checksum != self.header.checksum {
            return Err(IndexError::Corrupt(format!(
                "checksum {:#018x}, expected {:#018x}",
                checksum, self.header.checksum
            )));
        }
        Ok(())
    }

    /// Every posting names a stored window whose key is its bucket, in strictly
    /// ascending `(sequence, position)` order within the bucket.
    fn check_postings(&self) -> Result<(), IndexError> {
        for i in 0..self.header.n_buckets as usize {
            let (bucket, first, count) = self.bucket_record(i)?;
            let start = self.sections.postings + first * POSTING_LEN;
            let bytes = self.slice(start..start + count * POSTING_LEN)?;

            let mut prev: Option<(u32, u32)> = None;
            for (j, chunk) in bytes.chunks_exact(POSTING_LEN as usize).enumerate() {
                let seq_id = super::format::le_u32(&chunk[0..4]);
                let pos = super::format::le_u32(&chunk[4..8]);
                let posting = first + j as u64;

                let Some(symbols) = self.seq_symbols(seq_id) else {
                    return Err(IndexError::Corrupt(format!(
                        "posting {} points to sequence {} of {}",
                        posting, seq_id, self.header.n_seqs
                    )));
                };
                if pos as u64 + self.header.span as u64 > symbols.len() as u64 {
                    return Err(IndexError::Corrupt(format!(
                        "posting {} at {} runs past the end of sequence {} (length {})",
                        posting,
                        pos,
                        seq_id,
                        symbols.len()
                    )));
                }
                if self.extractor.bucket_at(symbols, pos as usize) != Some(bucket) {
                    return Err(IndexError::Corrupt(format!(
                        "posting {} (sequence {}, position {}) does not belong to bucket {}",
                        posting, seq_id, pos, bucket
                    )));
                }
                if prev.is_some_and(|p| p >= (seq_id, pos)) {
                    return Err(IndexError::Corrupt(format!(
                        "posting list of bucket {} not sorted at posting {}",
                        bucket, posting
                    )));
                }
                prev = Some((seq_id, pos));
            }
        }
        Ok(())
    }

    fn find_bucket(&self, bucket: u64) -> Option<(u64, u64)> {
        let (mut lo, mut hi) = (0usize, self.header.n_buckets as usize);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (b, first, count) = self.bucket_record(mid).ok()?;
            match b.cmp(&bucket) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some((first, count)),
            }
        }
        None
    }
}

impl KmerIndex for MappedIndex {
    fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    fn num_seqs(&self) -> usize {
        self.header.n_seqs as usize
    }

    fn num_buckets(&self) -> usize {
        self.header.n_buckets as usize
    }

    fn num_postings(&self) -> usize {
        self.header.n_postings as usize
    }

    fn postings(&self, bucket: u64) -> Postings<'_> {
        let Some((first, count)) = self.find_bucket(bucket) else {
            return Postings::empty();
        };
        let start = self.sections.postings + first * POSTING_LEN;
        match self.slice(start..start + count * POSTING_LEN) {
            Ok(bytes) => Postings::Mapped(bytes.chunks_exact(POSTING_LEN as usize)),
            Err(_) => Postings::empty(),
        }
    }

    fn seq_symbols(&self, id: u32) -> Option<&[u8]> {
        if id as u64 >= self.header.n_seqs {
            return None;
        }
        let rec = self.seq_record(id as u64).ok()?;
        let start = self.sections.symbols + rec.sym_offset;
        self.slice(start..start + rec.len).ok()
    }

    fn seq_name(&self, id: u32) -> Option<&str> {
        if id as u64 >= self.header.n_seqs {
            return None;
        }
        let rec = self.seq_record(id as u64).ok()?;
        let start = self.sections.names + rec.name_offset;
        let bytes = self.slice(start..start + rec.name_len).ok()?;
        std::str::from_utf8(bytes).ok()
    }
}
