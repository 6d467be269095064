use clap::*;
use kmerfold::libs::index::{KmerIndex, MappedIndex};
use kmerfold::libs::kmer::Extractor;
use kmerfold::libs::seqdb::SeqDb;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("kmers")
        .about("List the k-mers extracted from sequences")
        .after_help(
            r###"
Prints one line per indexed window, the same windows `createindex` and `search` use:

    name  position  bucket  word

* position is 0-based
* word shows one letter per key position, the first letter of its similarity group,
  and '.' for positions skipped by a spaced seed
* windows containing the wildcard are not listed

With --index, the alphabet and k-mer parameters are taken from the index.

Examples:
1. Contiguous 3-mers:
   kmerfold kmers seq.fa -k 3

2. As seen by an existing index:
   kmerfold kmers query.fa --index db.kmi

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
                .long("index")
                .num_args(1)
                .help("Use the parameters of this index"),
        )
        .args(super::args_alphabet())
        .args(super::args_kmer())
        .arg(super::arg_outfile())
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    let infile = args.get_one::<String>("infile").unwrap();
    let mut writer = intspan::writer(args.get_one::<String>("outfile").unwrap());

    let extractor = match args.get_one::<String>("index") {
        Some(index_file) => MappedIndex::open(index_file)?.extractor().clone(),
        None => Extractor::new(super::alphabet_from(args)?, super::kmer_params_from(args)?)?,
    };

    let (db, skipped) = SeqDb::read_fasta(infile, extractor.alphabet())?;
    super::log_skipped(infile, &skipped);

    for entry in db.iter() {
        for (pos, bucket) in extractor.kmers(entry.symbols()) {
            writer.write_fmt(format_args!(
                "{}\t{}\t{}\t{}\n",
                entry.name(),
                pos,
                bucket,
                extractor.decode(bucket)
            ))?;
        }
    }

    Ok(())
}
