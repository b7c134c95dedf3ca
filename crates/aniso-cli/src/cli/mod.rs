mod commands;
mod helpers;

use aniso_core::domain::AnisoError;
use clap::Parser;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().collect();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let core_error = error.into_core_error();
            eprintln!("{}", core_error.diagnostic_line());
            core_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(name = "anisomap", about = "Cosmic-ray anisotropy map engine")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run binned, reweighed, and Kolmogorov-Smirnov tests over table-driven
    /// configurations and write one combined map archive
    Analyze(commands::AnalyzeArgs),
    /// Produce the per-binning map archives described by a job configuration
    Job(commands::JobArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Analyze(args) => commands::run_analyze_command(args),
        CliCommand::Job(args) => commands::run_job_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Analysis(AnisoError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn into_core_error(self) -> AnisoError {
        match self {
            Self::Usage(message) => AnisoError::configuration(message),
            Self::Analysis(error) => error,
            Self::Internal(error) => AnisoError::computation(format!("{error:#}")),
        }
    }
}
