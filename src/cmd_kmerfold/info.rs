use clap::*;
use kmerfold::libs::index::{KmerIndex, MappedIndex};

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("info")
        .about("Show the parameters and statistics of an index")
        .after_help(
            r###"
Prints key-value pairs (tab-separated) describing an index file.

* Opening an index checks its checksum, its tables and every posting;
  a damaged index makes the command fail
* --verify runs the checksum and posting checks again and reports `verify OK`

Examples:
1. Show parameters:
   kmerfold info db.kmi

2. Check integrity:
   kmerfold info db.kmi --verify

"###,
        )
        .arg(
            Arg::new("index")
                .required(true)
                .index(1)
                .help("Index file created by `kmerfold createindex`"),
        )
        .arg(
            Arg::new("verify")
                .long("verify")
                .action(ArgAction::SetTrue)
                .help("Check the checksum and all postings"),
        )
        .arg(super::arg_outfile())
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    let index_file = args.get_one::<String>("index").unwrap();
    let mut writer = intspan::writer(args.get_one::<String>("outfile").unwrap());

    let index = MappedIndex::open(index_file)?;
    let header = index.header();
    let extractor = index.extractor();
    let alphabet = extractor.alphabet();

    let max_list = index.bucket_counts().map(|(_, n)| n).max().unwrap_or(0);
    let mean_list = if index.num_buckets() > 0 {
        index.num_postings() as f64 / index.num_buckets() as f64
    } else {
        0.0
    };

    let rows: Vec<(&str, String)> = vec![
        ("version", header.version.to_string()),
        ("alphabet", String::from_utf8_lossy(alphabet.letters()).to_string()),
        ("wildcard", (alphabet.letter(alphabet.wildcard()) as char).to_string()),
        ("pattern", extractor.params().pattern.to_string()),
        ("span", extractor.span().to_string()),
        ("weight", extractor.params().pattern.weight().to_string()),
        ("alph_size", extractor.buckets().size().to_string()),
        ("sequences", index.num_seqs().to_string()),
        ("symbols", header.symbols_len.to_string()),
        ("buckets", index.num_buckets().to_string()),
        ("postings", index.num_postings().to_string()),
        ("max_list", max_list.to_string()),
        ("mean_list", format!("{:.2}", mean_list)),
        ("file_size", index.file_size().to_string()),
        ("checksum", format!("{:016x}", header.checksum)),
    ];
    for (key, value) in rows {
        writer.write_fmt(format_args!("{}\t{}\n", key, value))?;
    }

    if args.get_flag("verify") {
        index.verify()?;
        writer.write_fmt(format_args!("verify\tOK\n"))?;
    }

    Ok(())
}
