//! Subcommand modules for the `kmerfold` binary.

pub mod createindex;
pub mod info;
pub mod kmers;
pub mod samplemulambda;
pub mod search;

use clap::*;
use kmerfold::libs::alphabet::Alphabet;
use kmerfold::libs::error::SkippedRecord;
use kmerfold::libs::kmer::{KmerParams, SpacedPattern};

/// `--matrix` and `--wildcard`
pub fn args_alphabet() -> Vec<Arg> {
    vec![
        Arg::new("matrix")
            .long("matrix")
            .num_args(1)
            .default_value("blosum62")
            .help("Substitution matrix: blosum62 or a BLAST-format matrix file"),
        Arg::new("wildcard")
            .long("wildcard")
            .num_args(1)
            .default_value("X")
            .help("Letter of unresolved positions"),
    ]
}

/// `--kmer`, `--mask` and `--alph-size`
pub fn args_kmer() -> Vec<Arg> {
    vec![
        Arg::new("kmer")
            .long("kmer")
            .short('k')
            .num_args(1)
            .value_parser(value_parser!(usize))
            .help("K-mer size [default: 6]"),
        Arg::new("mask")
            .long("mask")
            .num_args(1)
            .conflicts_with("kmer")
            .help("Spaced seed pattern, e.g. 1101011"),
        Arg::new("alph_size")
            .long("alph-size")
            .num_args(1)
            .value_parser(value_parser!(usize))
            .help("Merge letters into this many similarity buckets, 0 disables [default: 0]"),
    ]
}

pub fn arg_parallel() -> Arg {
    Arg::new("parallel")
        .long("parallel")
        .short('p')
        .num_args(1)
        .default_value("1")
        .value_parser(value_parser!(usize))
        .help("Number of threads for parallel processing")
}

pub fn arg_outfile() -> Arg {
    Arg::new("outfile")
        .long("outfile")
        .short('o')
        .num_args(1)
        .default_value("stdout")
        .help("Output filename. [stdout] for screen")
}

pub fn alphabet_from(args: &ArgMatches) -> anyhow::Result<Alphabet> {
    let matrix = args.get_one::<String>("matrix").unwrap();
    let wildcard = args.get_one::<String>("wildcard").unwrap();
    if wildcard.len() != 1 {
        anyhow::bail!("--wildcard takes a single letter, got {}", wildcard);
    }
    Alphabet::from_name(matrix, wildcard.as_bytes()[0])
}

pub fn kmer_params_from(args: &ArgMatches) -> anyhow::Result<KmerParams> {
    kmer_params_onto(args, KmerParams::default())
}

/// Override `params` with the k-mer options given on the command line.
pub fn kmer_params_onto(args: &ArgMatches, mut params: KmerParams) -> anyhow::Result<KmerParams> {
    if let Some(mask) = args.get_one::<String>("mask") {
        params.pattern = SpacedPattern::parse(mask)?;
    } else if let Some(&k) = args.get_one::<usize>("kmer") {
        params.pattern = SpacedPattern::contiguous(k)?;
    }
    if let Some(&n) = args.get_one::<usize>("alph_size") {
        params.reduced_size = n;
    }
    Ok(params)
}

pub fn set_threads(args: &ArgMatches) -> anyhow::Result<usize> {
    let opt_parallel = *args.get_one::<usize>("parallel").unwrap();
    rayon::ThreadPoolBuilder::new()
        .num_threads(opt_parallel)
        .build_global()?;
    Ok(opt_parallel)
}

pub fn log_skipped(infile: &str, skipped: &[SkippedRecord]) {
    for s in skipped {
        log::warn!("{}: skipped record {} ({}): {}", infile, s.index + 1, s.name, s.reason);
    }
    if !skipped.is_empty() {
        log::warn!("{}: {} records skipped", infile, skipped.len());
    }
}

/// Sizes such as `512M` or `2G`; a plain number is bytes.
pub fn parse_size(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid size: {}", s))?;
    let mult = match unit.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        _ => anyhow::bail!("Invalid size unit: {}", s),
    };
    n.checked_mul(mult)
        .ok_or_else(|| anyhow::anyhow!("Size too large: {}", s))
}
