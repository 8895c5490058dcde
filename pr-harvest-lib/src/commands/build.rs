use super::Host;
use super::common::{CommonArgs, Session};
use crate::Result;
use crate::collect::{Progress, RetryPolicy, superset_path};
use crate::dataset::{HarvestOptions, HarvestPipeline, Language};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// JSONL listing of pull requests, as written by the `pulls` command
    #[arg(value_name = "PR_FILE")]
    pub pr_file: Utf8PathBuf,

    /// Where instances with a test patch are written; all instances go to `<OUTPUT>.all`
    #[arg(value_name = "OUTPUT")]
    pub output: Utf8PathBuf,

    /// Pull requests created at or after this instant are skipped
    #[arg(long, value_name = "RFC3339", default_value = "2025-03-31T23:59:59Z")]
    pub cutoff_date: DateTime<Utc>,

    /// Language profile deciding which files make up the code patch
    #[arg(long, value_name = "LANGUAGE", default_value = "python")]
    pub language: Language,

    /// Pull requests processed at once
    #[arg(long, value_name = "COUNT", default_value_t = 20)]
    pub max_concurrency: usize,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Harvest dataset instances from a pull request listing.
pub async fn build_dataset<H: Host>(host: &mut H, args: &BuildArgs) -> Result<()> {
    let session = Session::new(&args.common).await?;

    let pipeline = HarvestPipeline::new(
        session.transport,
        session.api,
        HarvestOptions {
            language: args.language,
            overrides: session.config.classifier_overrides,
            cutoff: args.cutoff_date,
            max_concurrency: args.max_concurrency.max(1),
            policy: RetryPolicy::default(),
            proxy: session.proxy,
        },
    );

    let result = pipeline.run(&args.pr_file, &args.output, &session.progress).await;
    session.progress.done();
    let counts = result?;

    let _ = writeln!(host.output(), "{counts}");
    let _ = writeln!(
        host.output(),
        "{} instance(s) with tests in {}, {} in total in {}",
        counts.with_tests,
        args.output,
        counts.emitted,
        superset_path(&args.output)
    );
    Ok(())
}
