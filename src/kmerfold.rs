extern crate clap;
use clap::*;

mod cmd_kmerfold;

fn main() -> anyhow::Result<()> {
    let app = Command::new("kmerfold")
        .version(crate_version!())
        .author(crate_authors!())
        .about("`kmerfold` - k-mer prefilter for structural alphabet sequences")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Show debug messages"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .global(true)
                .conflicts_with("verbose")
                .action(ArgAction::SetTrue)
                .help("Only show warnings and errors"),
        )
        .subcommand(cmd_kmerfold::createindex::make_subcommand())
        .subcommand(cmd_kmerfold::search::make_subcommand())
        .subcommand(cmd_kmerfold::samplemulambda::make_subcommand())
        .subcommand(cmd_kmerfold::kmers::make_subcommand())
        .subcommand(cmd_kmerfold::info::make_subcommand())
        .after_help(
            r###"Subcommand groups:

* Index:
    * createindex - Build a k-mer index of a sequence collection
    * info        - Show parameters, statistics; verify integrity

* Search:
    * search         - Rank indexed sequences for each query
    * samplemulambda - Estimate score statistics for e-values

* Diagnostics:
    * kmers - List extracted k-mers

The log level follows -v/-q, or RUST_LOG when set.

"###,
        );

    let matches = app.get_matches();

    let level = if matches.get_flag("verbose") {
        log::LevelFilter::Debug
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    let mut logger = env_logger::Builder::new();
    logger.filter_level(level).format_timestamp(None).format_target(false);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    // Check which subcomamnd the user ran...
    match matches.subcommand() {
        Some(("createindex", sub_matches)) => cmd_kmerfold::createindex::execute(sub_matches),
        Some(("search", sub_matches)) => cmd_kmerfold::search::execute(sub_matches),
        Some(("samplemulambda", sub_matches)) => cmd_kmerfold::samplemulambda::execute(sub_matches),
        Some(("kmers", sub_matches)) => cmd_kmerfold::kmers::execute(sub_matches),
        Some(("info", sub_matches)) => cmd_kmerfold::info::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
