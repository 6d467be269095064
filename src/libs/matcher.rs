//! Diagonal-scoring prefilter.
//!
//! Every k-mer hit between a query and a target votes for the diagonal
//! `qpos - tpos` with the substitution score of the two windows. A target's raw
//! score is its best diagonal (or best band of nearby diagonals).

use crate::libs::calibrate::EvdParams;
use crate::libs::error::QueryError;
use crate::libs::index::KmerIndex;
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Candidates kept per query; 0 keeps all
    pub max_seqs: usize,
    pub min_score: i32,
    /// Diagonals at most this far apart are summed together; 0 scores single diagonals
    pub diag_band: u32,
    /// Keep the self hit when querying a collection against itself
    pub include_self: bool,
    /// Query ids are target ids of the same collection
    pub same_collection: bool,
    pub evd: Option<EvdParams>,
    pub max_evalue: Option<f64>,
    /// Replace raw scores by the best ungapped segment along the diagonal
    pub rescore: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_seqs: 300,
            min_score: 1,
            diag_band: 0,
            include_self: true,
            same_collection: false,
            evd: None,
            max_evalue: None,
            rescore: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub target_id: u32,
    pub score: i32,
    pub diagonal: i32,
    pub evalue: Option<f64>,
}

/// A query in letter form, encoded by the worker that searches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub id: u32,
    pub name: String,
    pub text: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub query_id: u32,
    pub name: String,
    pub candidates: Vec<Candidate>,
}

/// Results in query order, plus the queries that could not be searched.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<QueryResult>,
    pub errors: Vec<QueryError>,
}

pub struct Matcher<'a, I: KmerIndex + ?Sized> {
    index: &'a I,
    options: SearchOptions,
}

impl<'a, I: KmerIndex + ?Sized> Matcher<'a, I> {
    pub fn new(index: &'a I, options: SearchOptions) -> Self {
        Self { index, options }
    }

    pub fn index(&self) -> &I {
        self.index
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Ranked candidates of one encoded query.
    pub fn search_symbols(&self, query_id: u32, symbols: &[u8]) -> Vec<Candidate> {
        let extractor = self.index.extractor();

        //----------------------------
        // Collect hits: (target, diagonal, window score)
        //----------------------------
        let mut hits: Vec<(u32, i32, i32)> = vec![];
        for (qpos, bucket) in extractor.kmers(symbols) {
            for (target_id, tpos) in self.index.postings(bucket) {
                let Some(target) = self.index.seq_symbols(target_id) else {
                    continue;
                };
                let score = extractor.window_score(symbols, qpos as usize, target, tpos as usize);
                let diagonal = (qpos as i64 - tpos as i64) as i32;
                hits.push((target_id, diagonal, score));
            }
        }
        if hits.is_empty() {
            return vec![];
        }
        hits.sort_unstable();

        //----------------------------
        // Reduce per target
        //----------------------------
        let self_id = self.options.same_collection.then_some(query_id);
        let mut candidates = vec![];
        let mut self_hit = None;

        for (target_id, group) in &hits.iter().chunk_by(|h| h.0) {
            if self_id == Some(target_id) && !self.options.include_self {
                continue;
            }
            let diagonals: Vec<(i32, i32)> = group
                .chunk_by(|h| h.1)
                .into_iter()
                .map(|(diag, hs)| (diag, hs.map(|h| h.2).sum()))
                .collect();
            let (mut score, diagonal) = best_diagonal(&diagonals, self.options.diag_band);

            if self.options.rescore {
                if let Some(target) = self.index.seq_symbols(target_id) {
                    score = self.rescore_diagonal(symbols, target, diagonal);
                }
            }
            let candidate = Candidate {
                target_id,
                score,
                diagonal,
                evalue: self.options.evd.map(|evd| evd.evalue(score)),
            };

            if candidate.score < self.options.min_score {
                continue;
            }
            if let (Some(max), Some(e)) = (self.options.max_evalue, candidate.evalue) {
                if e > max {
                    continue;
                }
            }
            // exempt from truncation only
            if self_id == Some(target_id) {
                self_hit = Some(candidate.clone());
            }
            candidates.push(candidate);
        }

        //----------------------------
        // Rank and truncate
        //----------------------------
        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        if self.options.max_seqs > 0 {
            candidates.truncate(self.options.max_seqs);
        }

        if let Some(hit) = self_hit {
            if !candidates.iter().any(|c| c.target_id == hit.target_id) {
                if self.options.max_seqs > 0 && candidates.len() >= self.options.max_seqs {
                    candidates.pop();
                }
                candidates.push(hit);
                candidates.sort_by(|a, b| {
                    b.score
                        .cmp(&a.score)
                        .then_with(|| a.target_id.cmp(&b.target_id))
                });
            }
        }

        candidates
    }

    /// Encode and search one query record.
    pub fn search_record(&self, query: &QueryRecord) -> Result<QueryResult, QueryError> {
        let symbols = self
            .index
            .alphabet()
            .encode(&query.text)
            .map_err(|source| QueryError::InvalidSymbol {
                name: query.name.clone(),
                source,
            })?;
        Ok(QueryResult {
            query_id: query.id,
            name: query.name.clone(),
            candidates: self.search_symbols(query.id, &symbols),
        })
    }

    /// Search all queries on the rayon pool.
    pub fn search_batch(&self, queries: &[QueryRecord]) -> BatchOutcome {
        let never = AtomicBool::new(false);
        self.search_batch_until(queries, &never)
    }

    /// Like [`Matcher::search_batch`]; queries not started once `cancel` is set are
    /// reported as cancelled.
    pub fn search_batch_until(&self, queries: &[QueryRecord], cancel: &AtomicBool) -> BatchOutcome {
        let outcomes: Vec<Result<QueryResult, QueryError>> = queries
            .par_iter()
            .map(|q| {
                if cancel.load(Ordering::Relaxed) {
                    Err(QueryError::Cancelled {
                        name: q.name.clone(),
                    })
                } else {
                    self.search_record(q)
                }
            })
            .collect();

        let mut batch = BatchOutcome::default();
        for outcome in outcomes {
            match outcome {
                Ok(r) => batch.results.push(r),
                Err(e) => batch.errors.push(e),
            }
        }
        batch
    }

    /// Reader, `threads` workers and an in-order writer joined by bounded channels.
    ///
    /// `queries` is called on the reader thread and its records are pulled one at a
    /// time, so input is never held in memory as a whole. `sink` sees one outcome
    /// per query, in input order. An error from `sink` sets `cancel`, the reader
    /// stops at the next record, and the error is returned. A read error ends the
    /// input; the queries before it still reach `sink`.
    pub fn search_stream<P, Q, F>(
        &self,
        queries: P,
        threads: usize,
        cancel: &AtomicBool,
        mut sink: F,
    ) -> anyhow::Result<()>
    where
        P: FnOnce() -> anyhow::Result<Q> + Send,
        Q: IntoIterator<Item = anyhow::Result<QueryRecord>>,
        F: FnMut(Result<QueryResult, QueryError>) -> anyhow::Result<()>,
    {
        let threads = threads.max(1);

        // Channel 1 - queries with their input order
        let (snd1, rcv1) = crossbeam::channel::bounded::<(usize, QueryRecord)>(threads * 4);
        // Channel 2 - outcomes
        let (snd2, rcv2) = crossbeam::channel::bounded(threads * 4);

        let mut sink_error = None;
        let read_result = crossbeam::scope(|s| {
            //----------------------------
            // Reader thread
            //----------------------------
            let reader = s.spawn(move |_| -> anyhow::Result<()> {
                for (i, q) in queries()?.into_iter().enumerate() {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    if snd1.send((i, q?)).is_err() {
                        break;
                    }
                }
                Ok(())
            });

            //----------------------------
            // Worker threads
            //----------------------------
            for _ in 0..threads {
                let (sendr, recvr) = (snd2.clone(), rcv1.clone());
                s.spawn(move |_| {
                    for (i, q) in recvr.iter() {
                        let outcome = if cancel.load(Ordering::Relaxed) {
                            Err(QueryError::Cancelled { name: q.name })
                        } else {
                            self.search_record(&q)
                        };
                        if sendr.send((i, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(snd2);
            drop(rcv1);

            //----------------------------
            // Writer: restore input order
            //----------------------------
            let mut pending = BTreeMap::new();
            let mut next = 0usize;
            for (i, outcome) in rcv2.iter() {
                pending.insert(i, outcome);
                while let Some(outcome) = pending.remove(&next) {
                    next += 1;
                    if sink_error.is_some() {
                        continue;
                    }
                    if let Err(e) = sink(outcome) {
                        cancel.store(true, Ordering::Relaxed);
                        sink_error = Some(e);
                    }
                }
            }

            reader.join()
        })
        .map_err(|_| anyhow::anyhow!("a search thread panicked"))?;

        if let Some(e) = sink_error {
            return Err(e);
        }
        read_result.map_err(|_| anyhow::anyhow!("the query reader panicked"))?
    }

    /// Best ungapped segment score of `query` against `target` along `diagonal`.
    pub fn rescore_diagonal(&self, query: &[u8], target: &[u8], diagonal: i32) -> i32 {
        let alphabet = self.index.alphabet();
        let diagonal = diagonal as i64;
        let qstart = diagonal.max(0);
        let qend = (query.len() as i64).min(target.len() as i64 + diagonal);

        let mut best = 0;
        let mut current = 0;
        for qpos in qstart..qend {
            let tpos = qpos - diagonal;
            let s = alphabet.score(query[qpos as usize], target[tpos as usize]);
            current = (current + s).max(0);
            best = best.max(current);
        }
        best
    }
}

/// Best `(score, diagonal)` of per-diagonal sums sorted by diagonal.
///
/// With a band, any run of diagonals spanning at most `band` is summed; the
/// reported diagonal is the best single one inside the winning run. Ties go to
/// the lowest diagonal.
fn best_diagonal(diagonals: &[(i32, i32)], band: u32) -> (i32, i32) {
    let single = |run: &[(i32, i32)]| {
        run.iter()
            .copied()
            .fold(None, |best: Option<(i32, i32)>, (d, s)| match best {
                Some((bd, bs)) if bs >= s => Some((bd, bs)),
                _ => Some((d, s)),
            })
            .unwrap_or((0, 0))
    };

    if band == 0 {
        let (d, s) = single(diagonals);
        return (s, d);
    }

    let mut best: Option<(i32, usize, usize)> = None;
    for j in 0..diagonals.len() {
        let mut sum = 0;
        for i in (0..=j).rev() {
            if (diagonals[j].0 as i64 - diagonals[i].0 as i64) > band as i64 {
                break;
            }
            sum += diagonals[i].1;
            if best.map_or(true, |(bs, _, _)| sum > bs) {
                best = Some((sum, i, j));
            }
        }
    }

    match best {
        Some((sum, i, j)) => (sum, single(&diagonals[i..=j]).0),
        None => (0, 0),
    }
}
