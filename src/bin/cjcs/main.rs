extern crate clap;
#[macro_use]
extern crate error_chain;
extern crate cjcs;
#[macro_use]
extern crate slog;
extern crate slog_async;
extern crate slog_term;

use cjcs::config::Config;
use cjcs::errors::*;
use cjcs::schema_version;

use clap::{App, ArgMatches};
use slog::Logger;

fn main() {
    let app = App::new("cjcs")
        .version("0.1")
        .about("Coordination store for jobs and model evaluations")
        .arg_from_usage("    --get-db-name 'Prints the computed namespace and exits'")
        .arg_from_usage("-q, --quiet 'Quiets all output'");

    let matches = app.get_matches();
    let log = log(&matches);

    let res = if matches.is_present("get-db-name") {
        subcommand_get_db_name(&log)
    } else {
        eprintln!("no command given; try --get-db-name");
        std::process::exit(1);
    };

    if let Err(ref e) = res {
        handle_error(&log, e);
    }
}

fn subcommand_get_db_name(_log: &Logger) -> Result<()> {
    let config = Config::from_env()?;
    let suffix = config.name_suffix.clone();
    let name = schema_version::namespace(schema_version::SCHEMA_VERSION, &suffix);
    println!("{}", name);
    Ok(())
}

fn handle_error(log: &Logger, e: &Error) {
    for cause in error_strings(e) {
        error!(log, "{}", cause);
    }
    std::process::exit(1);
}

fn log(matches: &ArgMatches) -> Logger {
    if matches.is_present("quiet") {
        slog::Logger::root(slog::Discard, o!())
    } else {
        use slog::Drain;
        let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
        let drain = slog_term::CompactFormat::new(decorator).build().fuse();
        let async_drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(async_drain, o!())
    }
}
