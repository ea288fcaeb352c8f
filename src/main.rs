use std::process::ExitCode;

use clap::Parser;
use tape_session::cli::Cli;
use tape_session::commands::execute;
use tape_session::config::EnvConfig;
use tape_session::logging::init_tracing;

fn main() -> ExitCode {
    let config = EnvConfig::from_env();
    init_tracing(&config.log_filter, config.log_json);
    let cli = Cli::parse();

    let result = std::env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|cwd| execute(cli, &config, &cwd, &mut std::io::stdout().lock()));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
