//! Command dispatch logic for pr-harvest

use super::{BuildArgs, PullsArgs, build_dataset, list_pulls};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "pr-harvest", version, author, long_about = None)]
#[command(about = "Harvest merged pull requests and their linked issues into dataset instances")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: HarvestSubcommand,
}

#[derive(Subcommand, Debug)]
enum HarvestSubcommand {
    /// Build dataset instances from a pull request listing
    Build(Box<BuildArgs>),
    /// List the closed pull requests of a repository with the issues they close
    Pulls(Box<PullsArgs>),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// # Arguments
///
/// * `args` - An iterator of command-line arguments (typically from `std::env::args()`)
///
/// # Errors
///
/// Returns an error if the selected command cannot read its input or write its output
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    match &Cli::parse_from(args).command {
        HarvestSubcommand::Build(build_args) => build_dataset(host, build_args).await,
        HarvestSubcommand::Pulls(pulls_args) => list_pulls(host, pulls_args).await,
    }
}
