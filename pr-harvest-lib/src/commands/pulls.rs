use super::Host;
use super::common::{CommonArgs, Session};
use crate::Result;
use crate::collect::{Progress, RetryPolicy};
use crate::dataset::{ListingOptions, ListingPass};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct PullsArgs {
    /// Repository to list, as `owner/name`
    #[arg(value_name = "OWNER/NAME", value_parser = parse_repo)]
    pub repo: String,

    /// JSONL file the listing is appended to
    #[arg(value_name = "OUTPUT")]
    pub output: Utf8PathBuf,

    /// Pull requests whose linked issues are resolved at once
    #[arg(long, value_name = "COUNT", default_value_t = 10)]
    pub workers: usize,

    /// Do not cache listing pages next to the output
    #[arg(long)]
    pub no_cache: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

fn parse_repo(s: &str) -> Result<String, String> {
    match s.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok(s.to_string()),
        _ => Err(format!("expected a repository as 'owner/name', got '{s}'")),
    }
}

/// List the closed pull requests of a repository together with the issues they close.
pub async fn list_pulls<H: Host>(host: &mut H, args: &PullsArgs) -> Result<()> {
    let session = Session::new(&args.common).await?;

    let cache_root = (!args.no_cache).then(|| {
        args.output
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."))
            .to_path_buf()
    });

    let pass = ListingPass::new(
        session.transport,
        session.api,
        ListingOptions {
            per_page: session.config.per_page,
            page_workers: session.config.page_workers,
            workers: args.workers.max(1),
            policy: RetryPolicy::default(),
            proxy: session.proxy,
            cache_root,
        },
    );

    let result = pass.run(&args.repo, &args.output, &session.progress).await;
    session.progress.done();
    let counts = result?;

    let _ = writeln!(host.output(), "{counts}");
    Ok(())
}
