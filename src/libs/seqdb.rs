use crate::libs::alphabet::Alphabet;
use crate::libs::error::SkippedRecord;
use std::io::BufRead;

/// One encoded structure: an id, its original identifier and its symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqEntry {
    id: u32,
    name: String,
    symbols: Vec<u8>,
}

impl SeqEntry {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Encoded sequences over one alphabet.
///
/// Ids are dense and follow insertion order; entries never change once added.
#[derive(Debug, Clone, Default)]
pub struct SeqDb {
    entries: Vec<SeqEntry>,
}

impl SeqDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append already encoded symbols.
    ///
    /// A record holding an index outside `alphabet` is rejected as a whole.
    pub fn push_symbols(
        &mut self,
        alphabet: &Alphabet,
        name: &str,
        symbols: Vec<u8>,
    ) -> Result<u32, String> {
        if let Some(pos) = symbols.iter().position(|&s| !alphabet.is_valid(s)) {
            return Err(format!(
                "symbol index {} at position {} is outside the alphabet",
                symbols[pos], pos
            ));
        }
        if symbols.len() > u32::MAX as usize {
            return Err(format!("sequence of length {} is too long", symbols.len()));
        }
        let id = u32::try_from(self.entries.len())
            .map_err(|_| "too many sequences".to_string())?;
        self.entries.push(SeqEntry {
            id,
            name: name.to_string(),
            symbols,
        });
        Ok(id)
    }

    /// Encode and append a text record.
    pub fn push_text(&mut self, alphabet: &Alphabet, name: &str, text: &[u8]) -> Result<u32, String> {
        let symbols = alphabet.encode(text).map_err(|e| e.to_string())?;
        self.push_symbols(alphabet, name, symbols)
    }

    /// Build a store from `(name, text)` records, collecting the rejected ones.
    pub fn from_texts<'a, I>(alphabet: &Alphabet, records: I) -> (Self, Vec<SkippedRecord>)
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut db = Self::new();
        let mut skipped = vec![];
        for (index, (name, text)) in records.into_iter().enumerate() {
            if let Err(reason) = db.push_text(alphabet, name, text) {
                skipped.push(SkippedRecord {
                    index,
                    name: name.to_string(),
                    reason,
                });
            }
        }
        (db, skipped)
    }

    /// Read a FASTA file (plain, gzipped or `stdin`) of alphabet letters.
    pub fn read_fasta(infile: &str, alphabet: &Alphabet) -> anyhow::Result<(Self, Vec<SkippedRecord>)> {
        let records = read_fasta_records(infile)?;
        Ok(Self::from_texts(
            alphabet,
            records.iter().map(|(n, s)| (n.as_str(), s.as_slice())),
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&SeqEntry> {
        self.entries.get(id as usize)
    }

    pub fn entries(&self) -> &[SeqEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SeqEntry> {
        self.entries.iter()
    }

    pub fn total_symbols(&self) -> usize {
        self.entries.iter().map(|e| e.len()).sum()
    }
}

/// Raw `(name, sequence)` pairs of a FASTA file, letters not yet encoded.
pub fn read_fasta_records(infile: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let reader = intspan::reader(infile);
    read_fasta_from(reader)
}

pub fn read_fasta_from<R: BufRead>(reader: R) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    FastaRecords::new(reader).collect()
}

/// Lazy `(name, sequence)` pairs of a FASTA file, one record read per `next()`.
pub fn fasta_records(infile: &str) -> FastaRecords<Box<dyn BufRead>> {
    FastaRecords::new(intspan::reader(infile))
}

pub struct FastaRecords<R> {
    inner: noodles_fasta::io::Reader<R>,
}

impl<R: BufRead> FastaRecords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: noodles_fasta::io::Reader::new(reader),
        }
    }
}

impl<R: BufRead> Iterator for FastaRecords<R> {
    type Item = anyhow::Result<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.inner.records().next()?;
        Some(result.map_err(anyhow::Error::from).and_then(|record| {
            let name = String::from_utf8(record.name().into())?;
            let seq: &[u8] = record.sequence().as_ref();
            Ok((name, seq.to_vec()))
        }))
    }
}
