use clap::*;
use kmerfold::libs::calibrate::{
    CalibrateOptions, CalibrationSource, Calibrator, EvdEstimator, EvdParams, MaxLikelihood,
    Moments, Sidecar,
};
use kmerfold::libs::index::MappedIndex;
use kmerfold::libs::matcher::SearchOptions;
use std::io::Write;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("samplemulambda")
        .about("Estimate mu/lambda of prefilter scores from shuffled sequences")
        .after_help(
            r###"
This command samples sequences from the index, shuffles their letters, searches them against
the index and fits an extreme-value (Gumbel) distribution to the best score of each shuffled query:

    P(S > x) = 1 - exp(-exp(-lambda * (x - mu)))

With these parameters, `kmerfold search` reports e-values exp(-lambda * (score - mu)).

Output (tab-separated):
    mu      <value>
    lambda  <value>

Notes:
* Sequences are sampled evenly across the index, shuffled with --seed
* Results do not depend on --parallel
* Shuffled queries without any hit are counted but not used in the fit
* With fewer than --min-samples usable maxima, the fallback values are reported with a warning
* --diag-band and --rescore should match the ones used with `kmerfold search`
* The sidecar records the index checksum, --diag-band and --rescore; `search` ignores it
  when the index was rebuilt or the scoring mode differs

Examples:
1. Print the parameters:
   kmerfold samplemulambda db.kmi

2. Store them next to the index, where `search` picks them up:
   kmerfold samplemulambda db.kmi --sample 2000 --sidecar -p 8

"###,
        )
        .arg(
            Arg::new("index")
                .required(true)
                .index(1)
                .help("Index file created by `kmerfold createindex`"),
        )
        .arg(
            Arg::new("sample")
                .long("sample")
                .num_args(1)
                .default_value("1000")
                .value_parser(value_parser!(usize))
                .help("Number of sequences to shuffle and search"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .num_args(1)
                .default_value("42")
                .value_parser(value_parser!(u64))
                .help("Random seed"),
        )
        .arg(
            Arg::new("min_samples")
                .long("min-samples")
                .num_args(1)
                .default_value("10")
                .value_parser(value_parser!(usize))
                .help("Minimum number of maxima for a fit"),
        )
        .arg(
            Arg::new("estimator")
                .long("estimator")
                .num_args(1)
                .default_value("ml")
                .value_parser(["ml", "moments"])
                .help("Fitting method: maximum likelihood or method of moments"),
        )
        .arg(
            Arg::new("fallback_mu")
                .long("fallback-mu")
                .num_args(1)
                .default_value("10")
                .value_parser(value_parser!(f64))
                .allow_negative_numbers(true)
                .help("mu reported when no fit is possible"),
        )
        .arg(
            Arg::new("fallback_lambda")
                .long("fallback-lambda")
                .num_args(1)
                .default_value("0.3")
                .value_parser(value_parser!(f64))
                .help("lambda reported when no fit is possible"),
        )
        .arg(
            Arg::new("diag_band")
                .long("diag-band")
                .num_args(1)
                .default_value("0")
                .value_parser(value_parser!(u32))
                .help("Sum diagonals at most this far apart"),
        )
        .arg(
            Arg::new("rescore")
                .long("rescore")
                .action(ArgAction::SetTrue)
                .help("Score the best ungapped segment along the diagonal"),
        )
        .arg(
            Arg::new("sidecar")
                .long("sidecar")
                .action(ArgAction::SetTrue)
                .help("Also write <index>.evd, read by `kmerfold search`"),
        )
        .arg(super::arg_parallel())
        .arg(super::arg_outfile())
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let index_file = args.get_one::<String>("index").unwrap();
    let mut writer = intspan::writer(args.get_one::<String>("outfile").unwrap());

    let fallback = EvdParams {
        mu: *args.get_one::<f64>("fallback_mu").unwrap(),
        lambda: *args.get_one::<f64>("fallback_lambda").unwrap(),
    };
    if !fallback.is_valid() {
        anyhow::bail!(
            "Invalid fallback parameters: mu={} lambda={}",
            fallback.mu,
            fallback.lambda
        );
    }
    let options = CalibrateOptions {
        sample_size: *args.get_one::<usize>("sample").unwrap(),
        seed: *args.get_one::<u64>("seed").unwrap(),
        min_samples: *args.get_one::<usize>("min_samples").unwrap(),
        fallback,
    };
    let estimator: Box<dyn EvdEstimator> =
        match args.get_one::<String>("estimator").unwrap().as_str() {
            "moments" => Box::new(Moments),
            _ => Box::new(MaxLikelihood::default()),
        };
    let search = SearchOptions {
        diag_band: *args.get_one::<u32>("diag_band").unwrap(),
        rescore: args.get_flag("rescore"),
        ..Default::default()
    };

    super::set_threads(args)?;

    //----------------------------
    // Ops
    //----------------------------
    let index = MappedIndex::open(index_file)?;
    let result = Calibrator::new(&index, options)
        .with_estimator(estimator)
        .with_search_options(search.clone())
        .run();

    log::info!(
        "{} shuffled queries, {} without hits, {} maxima used",
        result.n_sampled,
        result.n_no_hit,
        result.n_used
    );
    if result.source == CalibrationSource::Fallback {
        log::warn!("Reporting fallback parameters");
    }

    writer.write_all(result.params.to_tsv().as_bytes())?;
    writer.flush()?;

    if args.get_flag("sidecar") {
        let path = EvdParams::sidecar_path(index.path());
        Sidecar::new(result.params, index.header().checksum, &search)
            .write(&path.to_string_lossy())?;
        log::info!("Wrote {}", path.display());
    }

    Ok(())
}
