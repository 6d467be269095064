use clap::*;
use kmerfold::libs::calibrate::{CalibrateOptions, Calibrator, EvdParams, Sidecar};
use kmerfold::libs::matcher::SearchOptions;
use kmerfold::libs::index::{BuildOptions, IndexBuilder, MappedIndex, POSTING_RECORD_LEN};
use kmerfold::libs::kmer::Extractor;
use kmerfold::libs::seqdb::SeqDb;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("createindex")
        .about("Build a k-mer index of a sequence collection")
        .after_help(
            r###"
This command encodes the sequences of a FASTA file with the alphabet of the substitution matrix
and writes an inverted k-mer index: for every k-mer bucket, the (sequence, position) pairs where it occurs.

Index parameters:
* --kmer/-k N: contiguous k-mers of length N
* --mask 1101011: spaced k-mers; '1' positions form the key, '0' positions are skipped
* --alph-size N: merge letters into N groups of similar letters before building keys
* --matrix: `blosum62` or a BLAST-format matrix file, whose letters form the alphabet
* --wildcard: the letter of unresolved positions; windows containing it are not indexed

Notes:
* Records containing letters outside the alphabet are skipped with a warning
* The file appears at <outfile> only after it was written completely
* Collections larger than --max-mem are sorted in temporary runs next to <outfile>
* --calibrate also writes score statistics to <outfile>.evd; without it, an existing
  <outfile>.evd is removed

Examples:
1. Index amino-acid sequences with 6-mers:
   kmerfold createindex db.fa db.kmi

2. Spaced seeds over a reduced alphabet:
   kmerfold createindex db.fa db.kmi --mask 1101011 --alph-size 13

3. Custom alphabet and calibration:
   kmerfold createindex db.3di.fa db.kmi --matrix 3di.mat -k 5 --calibrate -p 8

"###,
        )
        .arg(
            Arg::new("infile")
                .required(true)
                .index(1)
                .help("Input FASTA file. [stdin] for standard input"),
        )
        .arg(
            Arg::new("index")
                .required(true)
                .index(2)
                .help("Output index file"),
        )
        .args(super::args_alphabet())
        .args(super::args_kmer())
        .arg(
            Arg::new("max_mem")
                .long("max-mem")
                .num_args(1)
                .default_value("1G")
                .help("Memory for sorting postings, e.g. 512M, 4G"),
        )
        .arg(
            Arg::new("calibrate")
                .long("calibrate")
                .action(ArgAction::SetTrue)
                .help("Estimate mu/lambda and write <index>.evd"),
        )
        .arg(super::arg_parallel())
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let infile = args.get_one::<String>("infile").unwrap();
    let outfile = args.get_one::<String>("index").unwrap();

    let alphabet = super::alphabet_from(args)?;
    let params = super::kmer_params_from(args)?;
    let max_mem = super::parse_size(args.get_one::<String>("max_mem").unwrap())?;
    let is_calibrate = args.get_flag("calibrate");

    super::set_threads(args)?;

    //----------------------------
    // Ops
    //----------------------------
    let (db, skipped) = SeqDb::read_fasta(infile, &alphabet)?;
    super::log_skipped(infile, &skipped);
    log::info!(
        "Read {} sequences, {} symbols",
        db.len(),
        db.total_symbols()
    );

    let extractor = Extractor::new(alphabet, params)?;
    let options = BuildOptions {
        max_postings_in_memory: (max_mem / POSTING_RECORD_LEN as u64).max(1) as usize,
    };
    let builder = IndexBuilder::new(extractor, options);
    let summary = builder.write(&db, outfile)?;
    log::info!(
        "Wrote {}: {} buckets, {} postings, {} bytes",
        outfile,
        summary.n_buckets,
        summary.n_postings,
        summary.file_size
    );

    let sidecar = EvdParams::sidecar_path(std::path::Path::new(outfile));
    if is_calibrate {
        let index = MappedIndex::open(outfile)?;
        let search = SearchOptions::default();
        let result = Calibrator::new(&index, CalibrateOptions::default())
            .with_search_options(search.clone())
            .run();
        Sidecar::new(result.params, index.header().checksum, &search)
            .write(&sidecar.to_string_lossy())?;
        log::info!(
            "Calibrated on {} maxima: mu={:.4} lambda={:.4}",
            result.n_used,
            result.params.mu,
            result.params.lambda
        );
    } else if sidecar.is_file() {
        // fitted on whatever was at this path before
        std::fs::remove_file(&sidecar)?;
        log::info!("Removed {}", sidecar.display());
    }

    Ok(())
}
