use crate::libs::error::InvalidLetter;
use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;
use std::io::BufRead;

/// Value of the letter lookup table for bytes outside the alphabet
pub const INVALID_SYMBOL: u8 = 255;

/// Largest alphabet; 255 is reserved for [`INVALID_SYMBOL`]
pub const MAX_ALPHABET_SIZE: usize = 255;

lazy_static! {
    static ref BLOSUM62: Alphabet = Alphabet::build_blosum62();
}

/// A finite symbol set with a symmetric substitution matrix.
///
/// Symbols are stored as indices `0..size()`. One of them is the wildcard, used for
/// unresolved positions; k-mer windows containing it never reach the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    letters: Vec<u8>,
    wildcard: u8,
    matrix: Vec<i32>,
    lookup: Vec<u8>,
}

impl Alphabet {
    /// Create an alphabet from its letters, a row-major `n x n` matrix and the wildcard index.
    pub fn new(letters: &[u8], matrix: Vec<i32>, wildcard: u8) -> Result<Self> {
        let n = letters.len();
        if !(2..=MAX_ALPHABET_SIZE).contains(&n) {
            bail!("Alphabet size must be between 2 and {}, got {}", MAX_ALPHABET_SIZE, n);
        }
        if matrix.len() != n * n {
            bail!("Substitution matrix must have {} cells, got {}", n * n, matrix.len());
        }
        if wildcard as usize >= n {
            bail!("Wildcard index {} is outside the alphabet", wildcard);
        }

        let mut lookup = vec![INVALID_SYMBOL; 256];
        let mut upper = Vec::with_capacity(n);
        for (i, &l) in letters.iter().enumerate() {
            if !l.is_ascii_graphic() {
                bail!("Alphabet letters must be printable ASCII, got byte {}", l);
            }
            let u = l.to_ascii_uppercase();
            if lookup[u as usize] != INVALID_SYMBOL {
                bail!("Duplicated letter '{}' in alphabet", u as char);
            }
            lookup[u as usize] = i as u8;
            lookup[u.to_ascii_lowercase() as usize] = i as u8;
            upper.push(u);
        }

        for i in 0..n {
            for j in (i + 1)..n {
                if matrix[i * n + j] != matrix[j * n + i] {
                    bail!(
                        "Substitution matrix is not symmetric: {}{}={} but {}{}={}",
                        upper[i] as char,
                        upper[j] as char,
                        matrix[i * n + j],
                        upper[j] as char,
                        upper[i] as char,
                        matrix[j * n + i]
                    );
                }
            }
        }

        Ok(Self {
            letters: upper,
            wildcard,
            matrix,
            lookup,
        })
    }

    /// Letters scored `match_score` against themselves and `mismatch` against anything else.
    ///
    /// `wildcard` is appended when it is not one of `letters`.
    pub fn identity(letters: &[u8], wildcard: u8, match_score: i32, mismatch: i32) -> Result<Self> {
        let mut all = letters.to_vec();
        let wc = match letters
            .iter()
            .position(|l| l.eq_ignore_ascii_case(&wildcard))
        {
            Some(p) => p,
            None => {
                all.push(wildcard);
                all.len() - 1
            }
        };
        let n = all.len();
        let mut matrix = vec![mismatch; n * n];
        for i in 0..n {
            if i != wc {
                matrix[i * n + i] = match_score;
            }
        }
        Self::new(&all, matrix, wc as u8)
    }

    /// The built-in BLOSUM62 amino-acid alphabet, `X` as wildcard.
    pub fn blosum62() -> &'static Alphabet {
        &BLOSUM62
    }

    /// Load a preset (`blosum62`) or a BLAST-format matrix file.
    pub fn from_name(name: &str, wildcard: u8) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "blosum62" => Ok(Self::blosum62().clone()),
            _ => Self::from_file(name, wildcard),
        }
    }

    /// Load a substitution matrix from a file (BLAST format).
    ///
    /// The first non-comment line lists the letters; every following line is a row
    /// starting with its letter. Lines starting with '#' are comments.
    /// When `wildcard` is not among the letters it is appended and scored with the
    /// matrix minimum.
    pub fn from_file(path: &str, wildcard: u8) -> Result<Self> {
        let reader = intspan::reader(path);
        Self::read_matrix(reader, wildcard).map_err(|e| anyhow!("{}: {}", path, e))
    }

    pub fn read_matrix<R: BufRead>(reader: R, wildcard: u8) -> Result<Self> {
        let mut header: Vec<u8> = vec![];
        let mut rows: Vec<Option<Vec<i32>>> = vec![];

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();

            if header.is_empty() {
                if !parts.iter().all(|s| s.len() == 1) {
                    bail!("Matrix header must list single letters: {}", line);
                }
                header = parts.iter().map(|s| s.as_bytes()[0].to_ascii_uppercase()).collect();
                rows = vec![None; header.len()];
                continue;
            }

            let row_letter = parts[0].as_bytes()[0].to_ascii_uppercase();
            let row = header
                .iter()
                .position(|&l| l == row_letter)
                .ok_or_else(|| anyhow!("Row letter '{}' is not in the header", row_letter as char))?;
            if parts.len() != header.len() + 1 {
                bail!(
                    "Row '{}' has {} values, expected {}",
                    row_letter as char,
                    parts.len() - 1,
                    header.len()
                );
            }
            let values = parts[1..]
                .iter()
                .map(|s| s.parse::<i32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| anyhow!("Row '{}': {}", row_letter as char, e))?;
            rows[row] = Some(values);
        }

        if header.is_empty() {
            bail!("Empty substitution matrix");
        }
        let mut n = header.len();
        let mut matrix = Vec::with_capacity(n * n);
        for (i, row) in rows.into_iter().enumerate() {
            match row {
                Some(r) => matrix.extend(r),
                None => bail!("Missing row for letter '{}'", header[i] as char),
            }
        }

        let wildcard = wildcard.to_ascii_uppercase();
        let wc = match header.iter().position(|&l| l == wildcard) {
            Some(p) => p,
            None => {
                let min = matrix.iter().copied().min().unwrap_or(0);
                let mut grown = Vec::with_capacity((n + 1) * (n + 1));
                for i in 0..n {
                    grown.extend_from_slice(&matrix[i * n..(i + 1) * n]);
                    grown.push(min);
                }
                grown.extend(std::iter::repeat(min).take(n + 1));
                matrix = grown;
                header.push(wildcard);
                n += 1;
                n - 1
            }
        };

        Self::new(&header, matrix, wc as u8)
    }

    fn build_blosum62() -> Self {
        // A  R  N  D  C  Q  E  G  H  I  L  K  M  F  P  S  T  W  Y  V  X
        #[rustfmt::skip]
        let rows: [[i32; 21]; 21] = [
            [ 4, -1, -2, -2,  0, -1, -1,  0, -2, -1, -1, -1, -1, -2, -1,  1,  0, -3, -2,  0,  0],
            [-1,  5,  0, -2, -3,  1,  0, -2,  0, -3, -2,  2, -1, -3, -2, -1, -1, -3, -2, -3, -1],
            [-2,  0,  6,  1, -3,  0,  0,  0,  1, -3, -3,  0, -2, -3, -2,  1,  0, -4, -2, -3, -1],
            [-2, -2,  1,  6, -3,  0,  2, -1, -1, -3, -4, -1, -3, -3, -1,  0, -1, -4, -3, -3, -1],
            [ 0, -3, -3, -3,  9, -3, -4, -3, -3, -1, -1, -3, -1, -2, -3, -1, -1, -2, -2, -1, -2],
            [-1,  1,  0,  0, -3,  5,  2, -2,  0, -3, -2,  1,  0, -3, -1,  0, -1, -2, -1, -2, -1],
            [-1,  0,  0,  2, -4,  2,  5, -2,  0, -3, -3,  1, -2, -3, -1,  0, -1, -3, -2, -2, -1],
            [ 0, -2,  0, -1, -3, -2, -2,  6, -2, -4, -4, -2, -3, -3, -2,  0, -2, -2, -3, -3, -1],
            [-2,  0,  1, -1, -3,  0,  0, -2,  8, -3, -3, -1, -2, -1, -2, -1, -2, -2,  2, -3, -1],
            [-1, -3, -3, -3, -1, -3, -3, -4, -3,  4,  2, -3,  1,  0, -3, -2, -1, -3, -1,  3, -1],
            [-1, -2, -3, -4, -1, -2, -3, -4, -3,  2,  4, -2,  2,  0, -3, -2, -1, -2, -1,  1, -1],
            [-1,  2,  0, -1, -3,  1,  1, -2, -1, -3, -2,  5, -1, -3, -1,  0, -1, -3, -2, -2, -1],
            [-1, -1, -2, -3, -1,  0, -2, -3, -2,  1,  2, -1,  5,  0, -2, -1, -1, -1, -1,  1, -1],
            [-2, -3, -3, -3, -2, -3, -3, -3, -1,  0,  0, -3,  0,  6, -4, -2, -2,  1,  3, -1, -1],
            [-1, -2, -2, -1, -3, -1, -1, -2, -2, -3, -3, -1, -2, -4,  7, -1, -1, -4, -3, -2, -2],
            [ 1, -1,  1,  0, -1,  0,  0,  0, -1, -2, -2,  0, -1, -2, -1,  4,  1, -3, -2, -2,  0],
            [ 0, -1,  0, -1, -1, -1, -1, -2, -2, -1, -1, -1, -1, -2, -1,  1,  5, -2, -2,  0,  0],
            [-3, -3, -4, -4, -2, -2, -3, -2, -2, -3, -2, -3, -1,  1, -4, -3, -2, 11,  2, -3, -2],
            [-2, -2, -2, -3, -2, -1, -2, -3,  2, -1, -1, -2, -1,  3, -3, -2, -2,  2,  7, -1, -1],
            [ 0, -3, -3, -3, -1, -2, -2, -3, -3,  3,  1, -2,  1, -1, -2, -2,  0, -3, -1,  4, -1],
            [ 0, -1, -1, -1, -2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -2,  0,  0, -2, -1, -1, -1],
        ];
        let matrix: Vec<i32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        // Table above is symmetric
        Self::new(b"ARNDCQEGHILKMFPSTWYVX", matrix, 20).unwrap()
    }

    pub fn size(&self) -> usize {
        self.letters.len()
    }

    pub fn wildcard(&self) -> u8 {
        self.wildcard
    }

    pub fn letters(&self) -> &[u8] {
        &self.letters
    }

    pub fn letter(&self, symbol: u8) -> u8 {
        self.letters.get(symbol as usize).copied().unwrap_or(b'?')
    }

    /// Row-major substitution matrix
    pub fn matrix(&self) -> &[i32] {
        &self.matrix
    }

    #[inline]
    pub fn score(&self, a: u8, b: u8) -> i32 {
        self.matrix[a as usize * self.letters.len() + b as usize]
    }

    pub fn is_valid(&self, symbol: u8) -> bool {
        (symbol as usize) < self.letters.len()
    }

    /// Map letters to symbol indices. Case-insensitive.
    pub fn encode(&self, text: &[u8]) -> std::result::Result<Vec<u8>, InvalidLetter> {
        text.iter()
            .enumerate()
            .map(|(position, &letter)| match self.lookup[letter as usize] {
                INVALID_SYMBOL => Err(InvalidLetter { position, letter }),
                s => Ok(s),
            })
            .collect()
    }

    pub fn decode(&self, symbols: &[u8]) -> String {
        symbols.iter().map(|&s| self.letter(s) as char).collect()
    }
}
