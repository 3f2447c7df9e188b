use std::path::PathBuf;
use std::process::ExitCode;

use log::debug;

use clash::cli::GlobalOptions;
use clash::dispatch::Dispatcher;
use clash::engine::ShellEngine;
use clash::{load_config, logger};

/// Environment variable naming the config file, instead of searching for one
const CONFIG_ENV: &str = "CLASH_CONFIG";

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    logger::init()?;

    let config_file = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let config = load_config(config_file.as_deref())?;
    let dispatcher = Dispatcher::new(config, ShellEngine)?;

    let matches = match dispatcher.parse(std::env::args_os()) {
        Ok(matches) => matches,
        Err(e) => e.exit(),
    };

    let options = GlobalOptions::from_matches(&matches);
    let log_file = options
        .log_file
        .as_ref()
        .map(std::fs::File::create)
        .transpose()?;
    logger::configure(options.verbose, log_file);
    debug!(
        "Using config file {}",
        dispatcher.config().config_path.display()
    );

    dispatcher.dispatch(&matches)?;
    Ok(ExitCode::SUCCESS)
}
