#[macro_use]
extern crate log;

use std::fs::File;

use anyhow::Error;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::program::Program;

mod e621;
mod program;

/// Name of the log file that receives full trace output.
pub(crate) const LOG_NAME: &str = "e621_autoviewer.log";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    initialize_logger();

    let program = Program::new();
    program.run().await
}

/// Initializes terminal logging at info level and full trace logging to the
/// log file, filtered to this crate's own output.
fn initialize_logger() {
    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("e621_autoviewer");

    let log_file = match File::create(LOG_NAME) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to create {LOG_NAME}: {err}. Logging to the terminal only.");
            let _ = TermLogger::init(
                LevelFilter::Info,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            );
            return;
        }
    };

    if let Err(err) = CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::max(), config.build(), log_file),
    ]) {
        eprintln!("Failed to initialize combined logger: {err}. Falling back to terminal-only logging.");
        let _ = TermLogger::init(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    }
}
