use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use comdown::prelude::*;
use comdown::comdown::DEFAULT_MAX_CONCURRENT;

/// Download comic chapters from configured sites as PDF documents.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Series listing URL.
    #[arg(short = 'u', long, conflicts_with = "batch_file", required_unless_present = "batch_file")]
    url: Option<String>,

    /// File with one series URL per line.
    #[arg(short = 'b', long)]
    batch_file: Option<PathBuf>,

    /// First chapter to download (1-based, inclusive).
    #[arg(long, requires = "max")]
    min: Option<usize>,

    /// Last chapter to download (1-based, inclusive).
    #[arg(long)]
    max: Option<usize>,

    /// Download only this chapter (1-based).
    #[arg(short = 's', long, conflicts_with_all = ["min", "max"])]
    single: Option<usize>,

    /// Maximum chapters processed at once.
    #[arg(short = 'x', long, default_value_t = DEFAULT_MAX_CONCURRENT)]
    max_concurrent: usize,

    /// Merge this many consecutive chapters into one document (0 disables).
    #[arg(short = 'm', long, default_value_t = 0)]
    merge: usize,

    /// Upscale, sharpen and boost contrast of every image.
    #[arg(short = 'e', long)]
    enhance: bool,

    /// Keep going after a chapter fails and report every failure at the end.
    #[arg(long)]
    continue_on_error: bool,

    /// JSON site table.
    #[arg(short = 'c', long, default_value = "config.json")]
    sites: PathBuf,

    /// Output root directory.
    #[arg(short = 'o', long, default_value = "comics")]
    output: PathBuf,
}

impl Cli {
    fn selection(&self) -> SelectionPolicy {
        match (self.single, self.min, self.max) {
            (Some(single), _, _) => SelectionPolicy::Single(single),
            (None, min, Some(max)) => SelectionPolicy::Range {
                min: min.unwrap_or(1),
                max,
            },
            _ => SelectionPolicy::All,
        }
    }

    async fn targets(&self) -> comdown::error::Result<Vec<String>> {
        if let Some(url) = &self.url {
            return Ok(vec![url.clone()]);
        }
        let Some(path) = &self.batch_file else {
            return Ok(Vec::new());
        };
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

async fn run(cli: Cli) -> comdown::error::Result<()> {
    let sites = SiteRegistry::from_path(&cli.sites).await?;
    let targets = cli.targets().await?;

    let config = ComdownConfig::builder()
        .output_root(cli.output.clone())
        .selection(cli.selection())
        .max_concurrent(cli.max_concurrent)
        .merge_size(cli.merge)
        .enhance(cli.enhance)
        .continue_on_error(cli.continue_on_error)
        .build()?;

    Comdown::new(config, sites)?.run(&targets).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
