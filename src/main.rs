use argh::FromArgs;

/// incremental file-level build updater
#[derive(FromArgs)]
struct Args {
    /// enable debug logging
    #[argh(switch, short = 'd')]
    debug: bool,

    /// path to the project database (default: .tup/db)
    #[argh(option, default = "String::from(\".tup/db\")")]
    db: String,
}

fn main() {
    let args: Args = argh::from_env();

    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(log::LevelFilter::Warn);
    if args.debug {
        builder.filter_module("tup::updater", log::LevelFilter::Debug);
    }
    builder.init();

    if let Err(e) = tup_updater::run::run(&args.db) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
