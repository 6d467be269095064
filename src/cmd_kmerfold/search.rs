use clap::*;
use kmerfold::libs::calibrate::{EvdParams, Sidecar};
use kmerfold::libs::error::QueryError;
use kmerfold::libs::index::{KmerIndex, MappedIndex};
use kmerfold::libs::matcher::{Matcher, QueryRecord, QueryResult, SearchOptions};
use std::io::Write;
use std::sync::atomic::AtomicBool;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("search")
        .about("Prefilter: rank indexed sequences for each query")
        .after_help(
            r###"
This command extracts the k-mers of each query, looks them up in the index and scores
every target along the diagonals (query position - target position) of the shared k-mers.
A target's score is the best diagonal sum of substitution scores over the shared windows.

Output columns (tab-separated, no header):
    query  target  score  diagonal  evalue

* Queries are reported in input order, candidates by score (ties by target order in the index)
* The evalue column is empty unless calibration parameters are known
* Queries are read one record at a time; a read error stops the search after the
  queries already read
* Without <query.fa>, the sequences stored in the index are searched against the index itself

Calibration parameters come from --mu/--lambda, or else from <index>.evd when it exists.
The .evd file is ignored, with a warning, when it was fitted on another build of the
index or with a different --diag-band/--rescore. See `kmerfold samplemulambda`.

Notes:
* Queries must use the letters of the index alphabet; other queries are reported and skipped
* --kmer/--mask/--alph-size are only checked against the index; a mismatch is an error
* --diag-band N sums hits on diagonals at most N apart
* --rescore replaces scores by the best ungapped segment along the diagonal

Examples:
1. Search queries against an index:
   kmerfold search db.kmi query.fa -o hits.tsv

2. All-vs-all, without self hits, top 50 per query:
   kmerfold search db.kmi --exclude-self --max-seqs 50

3. E-value filter with explicit parameters:
   kmerfold search db.kmi query.fa --mu 12.5 --lambda 0.28 --evalue 0.001 -p 8

"###,
        )
        .arg(
            Arg::new("index")
                .required(true)
                .index(1)
                .help("Index file created by `kmerfold createindex`"),
        )
        .arg(
            Arg::new("query")
                .index(2)
                .help("Query FASTA file. [stdin] for standard input"),
        )
        .args(super::args_kmer())
        .arg(
            Arg::new("max_seqs")
                .long("max-seqs")
                .num_args(1)
                .default_value("300")
                .value_parser(value_parser!(usize))
                .help("Candidates kept per query, 0 keeps all"),
        )
        .arg(
            Arg::new("exclude_self")
                .long("exclude-self")
                .action(ArgAction::SetTrue)
                .help("Drop the hit of a query against itself in all-vs-all mode"),
        )
        .arg(
            Arg::new("min_score")
                .long("min-score")
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(i32))
                .allow_negative_numbers(true)
                .help("Minimum raw score"),
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
            Arg::new("evalue")
                .long("evalue")
                .short('e')
                .num_args(1)
                .value_parser(value_parser!(f64))
                .help("Maximum e-value"),
        )
        .arg(
            Arg::new("mu")
                .long("mu")
                .num_args(1)
                .requires("lambda")
                .value_parser(value_parser!(f64))
                .allow_negative_numbers(true)
                .help("Location of the score distribution"),
        )
        .arg(
            Arg::new("lambda")
                .long("lambda")
                .num_args(1)
                .requires("mu")
                .value_parser(value_parser!(f64))
                .help("Scale of the score distribution"),
        )
        .arg(
            Arg::new("rescore")
                .long("rescore")
                .action(ArgAction::SetTrue)
                .help("Score the best ungapped segment along each candidate's diagonal"),
        )
        .arg(
            Arg::new("max_queries")
                .long("max-queries")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .help("Stop after this many queries"),
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
    let opt_max_queries = args.get_one::<usize>("max_queries").copied();
    let mut writer = intspan::writer(args.get_one::<String>("outfile").unwrap());

    let opt_parallel = super::set_threads(args)?;

    let index = MappedIndex::open(index_file)?;
    let requested = super::kmer_params_onto(args, index.extractor().params().clone())?;
    index.check_params(&requested)?;

    let query_file = args.get_one::<String>("query");
    let mut options = SearchOptions {
        max_seqs: *args.get_one::<usize>("max_seqs").unwrap(),
        min_score: *args.get_one::<i32>("min_score").unwrap(),
        diag_band: *args.get_one::<u32>("diag_band").unwrap(),
        include_self: !args.get_flag("exclude_self"),
        same_collection: query_file.is_none(),
        evd: None,
        max_evalue: args.get_one::<f64>("evalue").copied(),
        rescore: args.get_flag("rescore"),
    };

    options.evd = match (
        args.get_one::<f64>("mu").copied(),
        args.get_one::<f64>("lambda").copied(),
    ) {
        (Some(mu), Some(lambda)) => {
            let p = EvdParams { mu, lambda };
            if !p.is_valid() {
                anyhow::bail!("Invalid --mu/--lambda: {} {}", mu, lambda);
            }
            Some(p)
        }
        _ => {
            let path = EvdParams::sidecar_path(index.path());
            if path.is_file() {
                let sidecar = Sidecar::read(&path.to_string_lossy())?;
                match sidecar.mismatch(index.header().checksum, &options) {
                    Some(reason) => {
                        log::warn!("Ignoring {}: {}", path.display(), reason);
                        None
                    }
                    None => {
                        let p = sidecar.params;
                        log::info!("Loaded mu={} lambda={} from {}", p.mu, p.lambda, path.display());
                        Some(p)
                    }
                }
            } else {
                None
            }
        }
    };
    if options.max_evalue.is_some() && options.evd.is_none() {
        anyhow::bail!("--evalue needs --mu/--lambda or {}.evd", index_file);
    }

    let limit = opt_max_queries.unwrap_or(usize::MAX);

    //----------------------------
    // Ops
    //----------------------------
    let matcher = Matcher::new(&index, options);
    let cancel = AtomicBool::new(false);
    let mut n_queries = 0usize;
    let mut n_hits = 0usize;
    let mut n_failed = 0usize;

    matcher.search_stream(
        || Ok(query_records(query_file, &index, limit)),
        opt_parallel,
        &cancel,
        |outcome: Result<QueryResult, QueryError>| {
            n_queries += 1;
            match outcome {
                Ok(result) => {
                    for c in &result.candidates {
                        let evalue = c.evalue.map(|e| format!("{:.3e}", e)).unwrap_or_default();
                        writer.write_fmt(format_args!(
                            "{}\t{}\t{}\t{}\t{}\n",
                            result.name,
                            index.seq_name(c.target_id).unwrap_or_default(),
                            c.score,
                            c.diagonal,
                            evalue
                        ))?;
                    }
                    n_hits += result.candidates.len();
                }
                Err(e) => {
                    log::warn!("{}", e);
                    n_failed += 1;
                }
            }
            Ok(())
        },
    )?;
    writer.flush()?;

    log::info!(
        "Searched {} queries: {} candidates, {} failed",
        n_queries,
        n_hits,
        n_failed
    );

    Ok(())
}

/// Queries read lazily from `query_file`, or the indexed sequences themselves.
fn query_records<'a>(
    query_file: Option<&'a String>,
    index: &'a MappedIndex,
    limit: usize,
) -> Box<dyn Iterator<Item = anyhow::Result<QueryRecord>> + 'a> {
    match query_file {
        Some(infile) => Box::new(
            kmerfold::libs::seqdb::fasta_records(infile)
                .take(limit)
                .enumerate()
                .map(|(i, record)| {
                    let (name, text) = record?;
                    Ok(QueryRecord {
                        id: i as u32,
                        name,
                        text,
                    })
                }),
        ),
        None => {
            let alphabet = index.alphabet();
            Box::new((0..index.num_seqs() as u32).take(limit).map(move |id| {
                Ok(QueryRecord {
                    id,
                    name: index.seq_name(id).unwrap_or_default().to_string(),
                    text: alphabet
                        .decode(index.seq_symbols(id).unwrap_or_default())
                        .into_bytes(),
                })
            }))
        }
    }
}
