//! Extreme-value calibration of raw prefilter scores.
//!
//! Shuffled background sequences are searched against the index; their best raw
//! scores follow a Gumbel distribution `P(S > x) = 1 - exp(-exp(-lambda (x - mu)))`
//! whose parameters turn raw scores into e-values.

use crate::libs::index::KmerIndex;
use crate::libs::matcher::{Matcher, SearchOptions};
use anyhow::{anyhow, bail};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};

/// Euler-Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvdParams {
    pub mu: f64,
    pub lambda: f64,
}

impl Default for EvdParams {
    fn default() -> Self {
        Self {
            mu: 10.0,
            lambda: 0.3,
        }
    }
}

impl EvdParams {
    /// Expected number of background maxima scoring at least `score`.
    pub fn evalue(&self, score: i32) -> f64 {
        (-self.lambda * (score as f64 - self.mu)).exp()
    }

    pub fn pvalue(&self, score: i32) -> f64 {
        -(-self.evalue(score)).exp_m1()
    }

    /// Raw score whose e-value is `evalue`.
    pub fn score_for_evalue(&self, evalue: f64) -> f64 {
        self.mu - evalue.ln() / self.lambda
    }

    pub fn is_valid(&self) -> bool {
        self.mu.is_finite() && self.lambda.is_finite() && self.lambda > 0.0
    }

    /// `<index>.evd`
    pub fn sidecar_path(index: &Path) -> PathBuf {
        let mut s = index.as_os_str().to_os_string();
        s.push(".evd");
        PathBuf::from(s)
    }

    pub fn to_tsv(&self) -> String {
        format!("mu\t{}\nlambda\t{}\n", self.mu, self.lambda)
    }

    pub fn write(&self, outfile: &str) -> anyhow::Result<()> {
        let mut writer = intspan::writer(outfile);
        writer.write_all(self.to_tsv().as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn read(infile: &str) -> anyhow::Result<Self> {
        Self::read_from(intspan::reader(infile))
    }

    /// Reads the `mu` and `lambda` lines; other keys are ignored.
    pub fn read_from<R: BufRead>(reader: R) -> anyhow::Result<Self> {
        let fields = read_tsv_pairs(reader)?;
        let get = |key: &str| -> anyhow::Result<f64> {
            let value = fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
                .ok_or_else(|| anyhow!("Missing {}", key))?;
            value
                .parse()
                .map_err(|e| anyhow!("Invalid value of {}: {}", key, e))
        };

        let params = Self {
            mu: get("mu")?,
            lambda: get("lambda")?,
        };
        if !params.is_valid() {
            bail!("Invalid calibration parameters mu={} lambda={}", params.mu, params.lambda);
        }
        Ok(params)
    }
}

fn read_tsv_pairs<R: BufRead>(reader: R) -> anyhow::Result<Vec<(String, String)>> {
    let mut pairs = vec![];
    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            continue;
        }
        pairs.push((fields[0].to_string(), fields[1].trim().to_string()));
    }
    Ok(pairs)
}

/// Calibration stored as `<index>.evd`, bound to the index it was fitted on and
/// to the scoring mode of the sampled searches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sidecar {
    pub params: EvdParams,
    /// Body checksum of the index
    pub index_checksum: u64,
    pub diag_band: u32,
    pub rescore: bool,
}

impl Sidecar {
    pub fn new(params: EvdParams, index_checksum: u64, search: &SearchOptions) -> Self {
        Self {
            params,
            index_checksum,
            diag_band: search.diag_band,
            rescore: search.rescore,
        }
    }

    pub fn to_tsv(&self) -> String {
        format!(
            "{}checksum\t{:016x}\ndiag_band\t{}\nrescore\t{}\n",
            self.params.to_tsv(),
            self.index_checksum,
            self.diag_band,
            self.rescore
        )
    }

    pub fn write(&self, outfile: &str) -> anyhow::Result<()> {
        let mut writer = intspan::writer(outfile);
        writer.write_all(self.to_tsv().as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn read(infile: &str) -> anyhow::Result<Self> {
        Self::read_from(intspan::reader(infile))
    }

    pub fn read_from<R: BufRead>(mut reader: R) -> anyhow::Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let params = EvdParams::read_from(text.as_bytes())?;
        let fields = read_tsv_pairs(text.as_bytes())?;
        let get = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .ok_or_else(|| anyhow!("Missing {}", key))
        };

        Ok(Self {
            params,
            index_checksum: u64::from_str_radix(get("checksum")?, 16)
                .map_err(|e| anyhow!("Invalid value of checksum: {}", e))?,
            diag_band: get("diag_band")?
                .parse()
                .map_err(|e| anyhow!("Invalid value of diag_band: {}", e))?,
            rescore: get("rescore")?
                .parse()
                .map_err(|e| anyhow!("Invalid value of rescore: {}", e))?,
        })
    }

    /// Why these parameters do not apply to an index with `index_checksum`
    /// searched with `search`, if they do not.
    pub fn mismatch(&self, index_checksum: u64, search: &SearchOptions) -> Option<String> {
        if self.index_checksum != index_checksum {
            Some(format!(
                "fitted on index {:016x}, this index is {:016x}",
                self.index_checksum, index_checksum
            ))
        } else if self.diag_band != search.diag_band || self.rescore != search.rescore {
            Some(format!(
                "fitted with diag_band={} rescore={}, searching with diag_band={} rescore={}",
                self.diag_band, self.rescore, search.diag_band, search.rescore
            ))
        } else {
            None
        }
    }
}

/// Fits Gumbel parameters to a sample of maxima.
pub trait EvdEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when the sample does not determine a distribution.
    fn fit(&self, samples: &[f64]) -> Option<EvdParams>;
}

fn mean_var(samples: &[f64]) -> Option<(f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var))
}

/// Method of moments: `lambda = pi / (sigma sqrt 6)`, `mu = mean - gamma / lambda`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Moments;

impl EvdEstimator for Moments {
    fn name(&self) -> &'static str {
        "moments"
    }

    fn fit(&self, samples: &[f64]) -> Option<EvdParams> {
        let (mean, var) = mean_var(samples)?;
        if !(var > 0.0) {
            return None;
        }
        let lambda = std::f64::consts::PI / (var.sqrt() * 6f64.sqrt());
        let params = EvdParams {
            mu: mean - EULER_GAMMA / lambda,
            lambda,
        };
        params.is_valid().then_some(params)
    }
}

/// Maximum likelihood; Newton iteration on lambda starting from the moments fit.
#[derive(Debug, Clone, Copy)]
pub struct MaxLikelihood {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for MaxLikelihood {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tolerance: 1e-10,
        }
    }
}

impl EvdEstimator for MaxLikelihood {
    fn name(&self) -> &'static str {
        "max-likelihood"
    }

    fn fit(&self, samples: &[f64]) -> Option<EvdParams> {
        let start = Moments.fit(samples)?;
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        // centred values keep the exponentials in range
        let xs: Vec<f64> = samples.iter().map(|x| x - mean).collect();

        // f(l) = 1/l - mean(x) + sum(x e^-lx) / sum(e^-lx), decreasing in l
        let mut lambda = start.lambda;
        for _ in 0..self.max_iter {
            let (mut s0, mut s1, mut s2) = (0.0, 0.0, 0.0);
            for &x in &xs {
                let w = (-lambda * x).exp();
                s0 += w;
                s1 += x * w;
                s2 += x * x * w;
            }
            let m1 = s1 / s0;
            let f = 1.0 / lambda + m1;
            let df = -1.0 / (lambda * lambda) - (s2 / s0 - m1 * m1);
            if !f.is_finite() || !df.is_finite() || df == 0.0 {
                return None;
            }

            let mut next = lambda - f / df;
            if next <= 0.0 {
                next = lambda / 2.0;
            }
            let done = (next - lambda).abs() <= self.tolerance * lambda;
            lambda = next;
            if done {
                break;
            }
        }

        let s0: f64 = xs.iter().map(|&x| (-lambda * x).exp()).sum();
        let params = EvdParams {
            mu: mean - (s0 / n).ln() / lambda,
            lambda,
        };
        params.is_valid().then_some(params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrateOptions {
    /// Background sequences to shuffle and search
    pub sample_size: usize,
    pub seed: u64,
    /// Fewer usable maxima fall back to `fallback`
    pub min_samples: usize,
    pub fallback: EvdParams,
}

impl Default for CalibrateOptions {
    fn default() -> Self {
        Self {
            sample_size: 1000,
            seed: 42,
            min_samples: 10,
            fallback: EvdParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSource {
    Fitted,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub params: EvdParams,
    pub source: CalibrationSource,
    /// Shuffled queries searched
    pub n_sampled: usize,
    /// Maxima used in the fit
    pub n_used: usize,
    /// Shuffled queries without any candidate
    pub n_no_hit: usize,
}

pub struct Calibrator<'a, I: KmerIndex + ?Sized> {
    index: &'a I,
    options: CalibrateOptions,
    search: SearchOptions,
    estimator: Box<dyn EvdEstimator>,
}

impl<'a, I: KmerIndex + ?Sized> Calibrator<'a, I> {
    pub fn new(index: &'a I, options: CalibrateOptions) -> Self {
        Self {
            index,
            options,
            search: SearchOptions::default(),
            estimator: Box::new(MaxLikelihood::default()),
        }
    }

    pub fn with_estimator(mut self, estimator: Box<dyn EvdEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Diagonal band and rescoring as used by the searches being calibrated.
    /// Ranking, filtering and self-hit settings are overridden.
    pub fn with_search_options(mut self, search: SearchOptions) -> Self {
        self.search = search;
        self
    }

    /// Evenly strided background ids.
    fn sample_ids(&self) -> Vec<u32> {
        let n = self.index.num_seqs();
        let m = self.options.sample_size.min(n);
        (0..m).map(|i| (i * n / m) as u32).collect()
    }

    /// Best raw score of each shuffled background sequence; `None` without candidates.
    pub fn sample_maxima(&self) -> Vec<Option<i32>> {
        let search = SearchOptions {
            max_seqs: 1,
            min_score: i32::MIN,
            include_self: true,
            same_collection: false,
            evd: None,
            max_evalue: None,
            ..self.search.clone()
        };
        let matcher = Matcher::new(self.index, search);
        let seed = self.options.seed;

        self.sample_ids()
            .par_iter()
            .enumerate()
            .map(|(i, &id)| {
                let mut symbols = self.index.seq_symbols(id).unwrap_or_default().to_vec();
                let mut rng = rand::rngs::StdRng::seed_from_u64(
                    seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
                );
                symbols.shuffle(&mut rng);
                matcher
                    .search_symbols(u32::MAX, &symbols)
                    .first()
                    .map(|c| c.score)
            })
            .collect()
    }

    pub fn run(&self) -> CalibrationResult {
        let maxima = self.sample_maxima();
        let n_sampled = maxima.len();
        let samples: Vec<f64> = maxima.iter().flatten().map(|&s| s as f64).collect();
        let n_used = samples.len();
        let n_no_hit = n_sampled - n_used;

        let fallback = |reason: &str| {
            log::warn!(
                "Calibration fell back to mu={} lambda={}: {}",
                self.options.fallback.mu,
                self.options.fallback.lambda,
                reason
            );
            CalibrationResult {
                params: self.options.fallback,
                source: CalibrationSource::Fallback,
                n_sampled,
                n_used,
                n_no_hit,
            }
        };

        if n_used < self.options.min_samples.max(2) {
            return fallback(&format!(
                "{} of {} shuffled queries had hits, {} needed",
                n_used, n_sampled, self.options.min_samples
            ));
        }
        if samples.iter().all(|&s| s == samples[0]) {
            return fallback("all maxima are equal");
        }

        match self.estimator.fit(&samples) {
            Some(params) => {
                log::debug!(
                    "{} fit on {} maxima: mu={} lambda={}",
                    self.estimator.name(),
                    n_used,
                    params.mu,
                    params.lambda
                );
                CalibrationResult {
                    params,
                    source: CalibrationSource::Fitted,
                    n_sampled,
                    n_used,
                    n_no_hit,
                }
            }
            None => fallback(&format!("{} fit did not converge", self.estimator.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::alphabet::Alphabet;
    use crate::libs::index::{BuildOptions, IndexBuilder, MemoryIndex};
    use crate::libs::kmer::{Extractor, KmerParams, SpacedPattern};
    use crate::libs::seqdb::SeqDb;
    use approx::assert_relative_eq;
    use rand::Rng;

    fn gumbel_samples(mu: f64, lambda: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let u: f64 = rng.gen_range(1e-12..1.0);
                mu - (-u.ln()).ln() / lambda
            })
            .collect()
    }

    fn background(n: usize, len: usize, seed: u64) -> MemoryIndex {
        let ab = Alphabet::blosum62().clone();
        let letters = b"ARNDCQEGHILKMFPSTWYV";
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let texts: Vec<(String, Vec<u8>)> = (0..n)
            .map(|i| {
                let seq = (0..len)
                    .map(|_| letters[rng.gen_range(0..letters.len())])
                    .collect();
                (format!("bg{}", i), seq)
            })
            .collect();
        let (db, _) = SeqDb::from_texts(&ab, texts.iter().map(|(n, s)| (n.as_str(), s.as_slice())));
        let params = KmerParams {
            pattern: SpacedPattern::contiguous(3).unwrap(),
            reduced_size: 0,
        };
        IndexBuilder::new(Extractor::new(ab, params).unwrap(), BuildOptions::default())
            .build_in_memory(&db)
    }

    #[test]
    fn test_evd_params() {
        let p = EvdParams { mu: 10.0, lambda: 0.5 };
        assert_relative_eq!(p.evalue(10), 1.0);
        assert_relative_eq!(p.evalue(12), (-1.0f64).exp());
        assert_relative_eq!(p.pvalue(10), 1.0 - (-1.0f64).exp());
        assert_relative_eq!(p.score_for_evalue(1.0), 10.0);
        assert_relative_eq!(p.score_for_evalue(p.evalue(30)), 30.0, max_relative = 1e-12);
        assert!(!EvdParams { mu: 1.0, lambda: 0.0 }.is_valid());
    }

    #[test]
    fn test_sidecar() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let index = dir.path().join("db.kmi");
        let side = EvdParams::sidecar_path(&index);
        assert_eq!(side.file_name().unwrap(), "db.kmi.evd");

        let p = EvdParams { mu: 12.25, lambda: 0.3125 };
        p.write(side.to_str().unwrap())?;
        assert_eq!(EvdParams::read(side.to_str().unwrap())?, p);

        assert!(EvdParams::read_from("mu\t1\n".as_bytes()).is_err());
        assert!(EvdParams::read_from("mu\t1\nlambda\t-2\n".as_bytes()).is_err());
        assert!(EvdParams::read_from("mu\tx\nlambda\t2\n".as_bytes()).is_err());
        Ok(())
    }

    #[test]
    fn test_sidecar_binding() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let side = dir.path().join("db.kmi.evd");
        let search = SearchOptions::default();
        let sidecar = Sidecar::new(EvdParams { mu: 12.25, lambda: 0.3125 }, 0xacd3_80a6, &search);
        sidecar.write(side.to_str().unwrap())?;

        let back = Sidecar::read(side.to_str().unwrap())?;
        assert_eq!(back, sidecar);
        // plain readers still see mu and lambda
        assert_eq!(EvdParams::read(side.to_str().unwrap())?, sidecar.params);

        assert_eq!(back.mismatch(0xacd3_80a6, &search), None);
        let stale = back.mismatch(0xf542_4a36, &search).unwrap();
        assert!(stale.contains("00000000f5424a36"), "{}", stale);
        let banded = SearchOptions {
            diag_band: 2,
            ..Default::default()
        };
        assert!(back.mismatch(0xacd3_80a6, &banded).is_some());
        let rescored = SearchOptions {
            rescore: true,
            ..Default::default()
        };
        assert!(back.mismatch(0xacd3_80a6, &rescored).is_some());

        // written before the binding existed
        assert!(Sidecar::read_from("mu\t1\nlambda\t0.5\n".as_bytes()).is_err());
        Ok(())
    }

    #[test]
    fn test_estimators_recover_parameters() {
        let samples = gumbel_samples(20.0, 0.4, 20000, 7);
        for estimator in [&Moments as &dyn EvdEstimator, &MaxLikelihood::default()] {
            let p = estimator.fit(&samples).unwrap();
            assert_relative_eq!(p.lambda, 0.4, max_relative = 0.05);
            assert_relative_eq!(p.mu, 20.0, max_relative = 0.02);
        }
    }

    #[test]
    fn test_estimators_degenerate() {
        assert!(Moments.fit(&[3.0]).is_none());
        assert!(Moments.fit(&[3.0, 3.0, 3.0]).is_none());
        assert!(MaxLikelihood::default().fit(&[5.0; 10]).is_none());
    }

    #[test]
    fn test_calibration_stable() {
        let index = background(60, 80, 11);
        let options = CalibrateOptions {
            sample_size: 40,
            seed: 5,
            min_samples: 5,
            ..Default::default()
        };

        let single = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap()
            .install(|| Calibrator::new(&index, options).run());
        let multi = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap()
            .install(|| Calibrator::new(&index, options).run());

        assert_eq!(single, multi);
        assert_eq!(single.n_sampled, 40);
        assert_eq!(single.n_used + single.n_no_hit, 40);
        assert_eq!(single.source, CalibrationSource::Fitted);
        assert!(single.params.is_valid());

        let other_seed = Calibrator::new(&index, CalibrateOptions { seed: 6, ..options }).run();
        assert_eq!(other_seed.n_sampled, 40);
    }

    #[test]
    fn test_calibration_fallback() {
        let index = background(3, 30, 1);
        let options = CalibrateOptions {
            min_samples: 10,
            ..Default::default()
        };
        let result = Calibrator::new(&index, options)
            .with_estimator(Box::new(Moments))
            .run();
        assert_eq!(result.source, CalibrationSource::Fallback);
        assert_eq!(result.params, options.fallback);
        assert_eq!(result.n_sampled, 3);
    }
}
