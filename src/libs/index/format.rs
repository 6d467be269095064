//! Persisted index layout.
//!
//! All integers are little-endian.
//!
//! ```text
//! header         88 bytes of fixed fields, alphabet letters, A*A i32 matrix
//! bucket table   n_buckets  x {bucket u64, first posting u64, count u64}
//! postings       n_postings x {seq_id u32, pos u32}
//! sequence table n_seqs     x {length u64, symbol offset u64, name offset u64, name length u64}
//! symbol blob    symbol indices of all sequences
//! name blob      UTF-8 identifiers of all sequences
//! ```
//!
//! The checksum covers every byte after the header.

use super::Posting;
use crate::libs::error::IndexError;
use crate::libs::kmer::Extractor;
use crate::libs::seqdb::SeqDb;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

pub const INDEX_MAGIC: [u8; 8] = *b"KMFIDX\0\0";

/// Bumped whenever the layout or the bucket derivation changes
pub const INDEX_VERSION: u32 = 1;

pub const FIXED_HEADER_LEN: usize = 88;
pub const BUCKET_RECORD_LEN: u64 = 24;
pub const POSTING_LEN: u64 = 8;
pub const SEQ_RECORD_LEN: u64 = 32;

#[inline]
pub fn le_u32(b: &[u8]) -> u32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[..4]);
    u32::from_le_bytes(a)
}

#[inline]
pub fn le_u64(b: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    u64::from_le_bytes(a)
}

#[inline]
pub fn le_i32(b: &[u8]) -> i32 {
    le_u32(b) as i32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u32,
    pub header_len: u32,
    pub alphabet_size: u32,
    pub wildcard: u32,
    pub span: u32,
    pub reduced_size: u32,
    pub mask: u64,
    pub n_buckets: u64,
    pub n_postings: u64,
    pub n_seqs: u64,
    pub symbols_len: u64,
    pub names_len: u64,
    pub checksum: u64,
    pub letters: Vec<u8>,
    pub matrix: Vec<i32>,
}

/// Byte offsets of every section, computed from the header counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub table: u64,
    pub postings: u64,
    pub seqs: u64,
    pub symbols: u64,
    pub names: u64,
    pub end: u64,
}

pub fn header_len_for(alphabet_size: usize) -> usize {
    FIXED_HEADER_LEN + alphabet_size + 4 * alphabet_size * alphabet_size
}

impl IndexHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header_len as usize);
        buf.extend_from_slice(&INDEX_MAGIC);
        for v in [
            self.version,
            self.header_len,
            self.alphabet_size,
            self.wildcard,
            self.span,
            self.reduced_size,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in [
            self.mask,
            self.n_buckets,
            self.n_postings,
            self.n_seqs,
            self.symbols_len,
            self.names_len,
            self.checksum,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&self.letters);
        for v in &self.matrix {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    /// Parse and sanity check the header. Magic and version are checked before
    /// anything else is trusted.
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self, IndexError> {
        if bytes.len() < INDEX_MAGIC.len() || bytes[..INDEX_MAGIC.len()] != INDEX_MAGIC {
            return Err(IndexError::NotAnIndex {
                path: path.to_path_buf(),
            });
        }
        if bytes.len() < 12 {
            return Err(IndexError::Truncated {
                expected: FIXED_HEADER_LEN as u64,
                found: bytes.len() as u64,
            });
        }
        let version = le_u32(&bytes[8..]);
        if version != INDEX_VERSION {
            return Err(IndexError::VersionMismatch {
                expected: INDEX_VERSION,
                found: version,
            });
        }
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(IndexError::Truncated {
                expected: FIXED_HEADER_LEN as u64,
                found: bytes.len() as u64,
            });
        }

        let header_len = le_u32(&bytes[12..]);
        let alphabet_size = le_u32(&bytes[16..]);
        if alphabet_size < 2 || alphabet_size > 255 {
            return Err(IndexError::Corrupt(format!(
                "alphabet size {}",
                alphabet_size
            )));
        }
        let a = alphabet_size as usize;
        if header_len as usize != header_len_for(a) {
            return Err(IndexError::Corrupt(format!(
                "header length {} does not match alphabet size {}",
                header_len, alphabet_size
            )));
        }
        if bytes.len() < header_len as usize {
            return Err(IndexError::Truncated {
                expected: header_len as u64,
                found: bytes.len() as u64,
            });
        }

        let letters = bytes[FIXED_HEADER_LEN..FIXED_HEADER_LEN + a].to_vec();
        let matrix_start = FIXED_HEADER_LEN + a;
        let matrix = (0..a * a)
            .map(|i| le_i32(&bytes[matrix_start + 4 * i..]))
            .collect();

        Ok(Self {
            version,
            header_len,
            alphabet_size,
            wildcard: le_u32(&bytes[20..]),
            span: le_u32(&bytes[24..]),
            reduced_size: le_u32(&bytes[28..]),
            mask: le_u64(&bytes[32..]),
            n_buckets: le_u64(&bytes[40..]),
            n_postings: le_u64(&bytes[48..]),
            n_seqs: le_u64(&bytes[56..]),
            symbols_len: le_u64(&bytes[64..]),
            names_len: le_u64(&bytes[72..]),
            checksum: le_u64(&bytes[80..]),
            letters,
            matrix,
        })
    }

    pub fn sections(&self) -> Result<Sections, IndexError> {
        let overflow = || IndexError::Corrupt("section sizes overflow".to_string());
        let table = self.header_len as u64;
        let postings = self
            .n_buckets
            .checked_mul(BUCKET_RECORD_LEN)
            .and_then(|n| n.checked_add(table))
            .ok_or_else(overflow)?;
        let seqs = self
            .n_postings
            .checked_mul(POSTING_LEN)
            .and_then(|n| n.checked_add(postings))
            .ok_or_else(overflow)?;
        let symbols = self
            .n_seqs
            .checked_mul(SEQ_RECORD_LEN)
            .and_then(|n| n.checked_add(seqs))
            .ok_or_else(overflow)?;
        let names = symbols.checked_add(self.symbols_len).ok_or_else(overflow)?;
        let end = names.checked_add(self.names_len).ok_or_else(overflow)?;

        Ok(Sections {
            table,
            postings,
            seqs,
            symbols,
            names,
            end,
        })
    }
}

/// Counts reported after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub n_seqs: u64,
    pub n_buckets: u64,
    pub n_postings: u64,
    pub file_size: u64,
}

/// Passes bytes through while hashing them.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Xxh3,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write an index file from a stream of postings sorted by `(bucket, seq_id, pos)`.
///
/// The file appears at `path` only once it is complete: everything is written to a
/// temporary file in the same directory, which is then renamed.
pub fn write_index<I>(
    path: &Path,
    extractor: &Extractor,
    db: &SeqDb,
    postings: I,
) -> Result<IndexSummary, IndexError>
where
    I: IntoIterator<Item = io::Result<Posting>>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };

    //----------------------------
    // Postings go to a spill file while the bucket table is collected
    //----------------------------
    let mut spill = BufWriter::new(tempfile::tempfile_in(&dir)?);
    let mut table: Vec<(u64, u64, u64)> = vec![];
    let mut n_postings = 0u64;
    let mut last: Option<Posting> = None;

    for posting in postings {
        let posting = posting?;
        if let Some(prev) = last {
            if posting == prev {
                continue;
            }
            if posting < prev {
                return Err(IndexError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "postings are not sorted",
                )));
            }
        }
        match table.last_mut() {
            Some((bucket, _, count)) if *bucket == posting.bucket => *count += 1,
            _ => table.push((posting.bucket, n_postings, 1)),
        }
        spill.write_all(&posting.seq_id.to_le_bytes())?;
        spill.write_all(&posting.pos.to_le_bytes())?;
        n_postings += 1;
        last = Some(posting);
    }
    let mut spill = spill.into_inner().map_err(|e| e.into_error())?;
    spill.seek(SeekFrom::Start(0))?;

    //----------------------------
    // Assemble the final file
    //----------------------------
    let alphabet = extractor.alphabet();
    let params = extractor.params();
    let mut header = IndexHeader {
        version: INDEX_VERSION,
        header_len: header_len_for(alphabet.size()) as u32,
        alphabet_size: alphabet.size() as u32,
        wildcard: alphabet.wildcard() as u32,
        span: params.pattern.span() as u32,
        reduced_size: params.reduced_size as u32,
        mask: params.pattern.bits(),
        n_buckets: table.len() as u64,
        n_postings,
        n_seqs: db.len() as u64,
        symbols_len: db.total_symbols() as u64,
        names_len: db.iter().map(|e| e.name().len() as u64).sum(),
        checksum: 0,
        letters: alphabet.letters().to_vec(),
        matrix: alphabet.matrix().to_vec(),
    };

    let tmp = tempfile::NamedTempFile::new_in(&dir)?;
    let mut out = HashingWriter {
        inner: BufWriter::new(tmp.reopen()?),
        hasher: Xxh3::new(),
        written: 0,
    };
    // Placeholder, rewritten with the checksum below; not part of the hash
    out.inner.write_all(&vec![0u8; header.header_len as usize])?;

    for (bucket, first, count) in &table {
        out.write_all(&bucket.to_le_bytes())?;
        out.write_all(&first.to_le_bytes())?;
        out.write_all(&count.to_le_bytes())?;
    }

    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = spill.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }

    let mut sym_offset = 0u64;
    let mut name_offset = 0u64;
    for entry in db.iter() {
        let len = entry.len() as u64;
        let name_len = entry.name().len() as u64;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&sym_offset.to_le_bytes())?;
        out.write_all(&name_offset.to_le_bytes())?;
        out.write_all(&name_len.to_le_bytes())?;
        sym_offset += len;
        name_offset += name_len;
    }
    for entry in db.iter() {
        out.write_all(entry.symbols())?;
    }
    for entry in db.iter() {
        out.write_all(entry.name().as_bytes())?;
    }

    header.checksum = out.hasher.digest();
    let body_len = out.written;
    let mut file = out.inner.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.encode())?;
    file.sync_all()?;
    drop(file);

    tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;

    log::debug!(
        "Wrote {}: {} sequences, {} buckets, {} postings",
        path.display(),
        header.n_seqs,
        header.n_buckets,
        header.n_postings
    );

    Ok(IndexSummary {
        n_seqs: header.n_seqs,
        n_buckets: header.n_buckets,
        n_postings,
        file_size: header.header_len as u64 + body_len,
    })
}

/// Read only the header of the index at `path`.
pub fn read_header(path: &Path) -> Result<IndexHeader, IndexError> {
    let mut file = File::open(path)?;
    let mut fixed = vec![0u8; FIXED_HEADER_LEN];
    let n = read_up_to(&mut file, &mut fixed)?;
    if n < FIXED_HEADER_LEN {
        fixed.truncate(n);
        return IndexHeader::decode(&fixed, path);
    }

    let alphabet_size = (le_u32(&fixed[16..]) as usize).min(255);
    let mut bytes = vec![0u8; header_len_for(alphabet_size)];
    file.seek(SeekFrom::Start(0))?;
    let n = read_up_to(&mut file, &mut bytes)?;
    bytes.truncate(n);
    IndexHeader::decode(&bytes, path)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}
