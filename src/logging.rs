use std::error::Error;
use std::fs::File;
use std::path::Path;

use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, TermLogger, TerminalMode, WriteLogger};

/// Logs to stdout through env_logger, honoring `RUST_LOG`. With a log file,
/// terminal and file output are combined instead and the file always gets
/// debug records.
pub fn init_logging(log_file: Option<&Path>, verbose: bool) -> Result<(), Box<dyn Error>> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    match log_file {
        None => {
            env_logger::Builder::new()
                .target(env_logger::Target::Stdout)
                .filter_level(level)
                .parse_env("RUST_LOG")
                .try_init()?;
        }
        Some(path) => {
            let file = File::create(path)?;
            CombinedLogger::init(vec![
                TermLogger::new(
                    level,
                    simplelog::Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(LevelFilter::Debug, simplelog::Config::default(), file),
            ])?;
        }
    }
    Ok(())
}
