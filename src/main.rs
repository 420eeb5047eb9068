use anyhow::{bail, Context, Result};
use arxiv_harvest::config::load_config;
use arxiv_harvest::models::{
    DownloadOutcome, DownloadReport, PaperRecord, SearchCriteria, SearchResult, SortBy, SortOrder,
};
use arxiv_harvest::ArxivClient;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// arxiv-harvest - Search arXiv and download papers
#[derive(Parser, Debug)]
#[command(name = "arxiv-harvest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search the arXiv API and download paper PDFs", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Sort field for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SortField {
    /// Sort by relevance
    Relevance,
    /// Sort by last update
    Updated,
    /// Sort by submission date
    Submitted,
}

impl From<SortField> for SortBy {
    fn from(field: SortField) -> Self {
        match field {
            SortField::Relevance => SortBy::Relevance,
            SortField::Updated => SortBy::LastUpdated,
            SortField::Submitted => SortBy::Submitted,
        }
    }
}

/// Sort order
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Order {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl From<Order> for SortOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => SortOrder::Ascending,
            Order::Desc => SortOrder::Descending,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search for papers by query or identifier
    #[command(alias = "s")]
    Search {
        /// Search expression, e.g. 'ti:"quantum computing" AND cat:quant-ph'
        #[arg(required_unless_present = "ids", conflicts_with = "ids")]
        query: Option<String>,

        /// Look up explicit arXiv identifiers instead of searching
        #[arg(long = "id", value_name = "ID", num_args = 1..)]
        ids: Vec<String>,

        /// Maximum number of results
        #[arg(long, short, default_value_t = 10)]
        max_results: u64,

        /// Offset of the first result
        #[arg(long)]
        start: Option<u64>,

        /// Sort by field
        #[arg(long, value_enum)]
        sort_by: Option<SortField>,

        /// Sort order
        #[arg(long, value_enum)]
        sort_order: Option<Order>,

        /// Print the full result as JSON
        #[arg(long, short)]
        json: bool,

        /// Download the PDF of every result
        #[arg(long, short)]
        download: bool,

        /// Download directory (implies downloads are enabled)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Download PDFs for arXiv identifiers
    #[command(alias = "d")]
    Download {
        /// arXiv identifiers
        #[arg(long = "id", value_name = "ID", num_args = 1.., required = true)]
        ids: Vec<String>,

        /// Download directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// File name to save under (single identifier only)
        #[arg(long, short)]
        output: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = if cli.quiet { "error" } else { log_level };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("arxiv_harvest={}", env_filter)),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }

        Commands::Search {
            query,
            ids,
            max_results,
            start,
            sort_by,
            sort_order,
            json,
            download,
            dir,
        } => {
            let mut criteria = match query {
                Some(query) => SearchCriteria::query(query),
                None => SearchCriteria::ids(ids),
            };
            criteria.max_results = Some(max_results);
            criteria.start = start;
            criteria.sort_by = sort_by.map(Into::into);
            criteria.sort_order = sort_order.map(Into::into);

            if download || dir.is_some() {
                config.enable_downloader = true;
                if dir.is_some() {
                    config.download_dir = dir;
                }
            }
            let client = ArxivClient::new(config)?;

            let outcome = tokio::select! {
                outcome = run_search(&client, criteria, json, cli.quiet) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Interrupted, cancelling requests");
                    Ok(())
                }
            };
            client.close();
            outcome
        }

        Commands::Download { ids, dir, output } => {
            if output.is_some() && ids.len() > 1 {
                bail!("--output can only be used with a single --id");
            }
            config.enable_downloader = true;
            if dir.is_some() {
                config.download_dir = dir;
            }
            let client = ArxivClient::new(config)?;

            let outcome = tokio::select! {
                outcome = run_download(&client, ids, output, cli.quiet) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Interrupted, cancelling downloads");
                    Ok(())
                }
            };
            client.close();
            outcome
        }
    }
}

async fn run_search(
    client: &ArxivClient,
    criteria: SearchCriteria,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let result = client.search(criteria).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, quiet);
    }

    if client.downloads_enabled() {
        let report = client.download_all(&result).await;
        print_report(&report, quiet);
    }
    Ok(())
}

async fn run_download(
    client: &ArxivClient,
    ids: Vec<String>,
    output: Option<String>,
    quiet: bool,
) -> Result<()> {
    let wanted = ids.len() as u64;
    let result = client
        .search(SearchCriteria::ids(ids).max_results(wanted))
        .await?;

    if result.is_empty() {
        bail!("no papers found for the given identifiers");
    }

    if let Some(name) = output {
        let paper = &result.papers[0];
        let outcome = client.download_one(paper, Some(&name)).await;
        print_outcome(paper, &outcome, quiet);
        if !outcome.is_success() {
            bail!("download failed");
        }
        return Ok(());
    }

    let report = client.download_all(&result).await;
    print_report(&report, quiet);
    if report.tracker().is_some_and(|t| t.failed > 0) {
        bail!("some downloads failed");
    }
    Ok(())
}

fn print_result(result: &SearchResult, quiet: bool) {
    if !quiet {
        eprintln!(
            "Found {} of {} papers in {} pages ({:.2}s)",
            result.papers.len(),
            result.total_results,
            result.metadata.pages_fetched,
            result.metadata.duration.as_secs_f64()
        );
    }
    for paper in &result.papers {
        print_paper(paper);
    }
    if result.has_next && !quiet {
        eprintln!(
            "More results available, continue with --start {}",
            result.next_offset
        );
    }
}

fn print_paper(paper: &PaperRecord) {
    println!("{}  {}", paper.id, paper.title);
    if !paper.authors.is_empty() {
        println!("    {}", paper.authors.join(", "));
    }
    let mut details = Vec::new();
    if let Some(published) = paper.published {
        details.push(published.format("%Y-%m-%d").to_string());
    }
    if let Some(category) = &paper.primary_category {
        details.push(category.clone());
    }
    if let Some(doi) = &paper.doi {
        details.push(format!("doi:{}", doi));
    }
    if !details.is_empty() {
        println!("    {}", details.join(" | "));
    }
}

fn print_outcome(paper: &PaperRecord, outcome: &DownloadOutcome, quiet: bool) {
    match outcome {
        DownloadOutcome::Downloaded { path, bytes } => {
            if !quiet {
                println!("{}: saved {} bytes to {}", paper.id, bytes, path.display());
            }
        }
        DownloadOutcome::Skipped { path } => {
            if !quiet {
                println!("{}: already present at {}", paper.id, path.display());
            }
        }
        DownloadOutcome::Failed { reason } => eprintln!("{}: failed: {}", paper.id, reason),
        DownloadOutcome::Disabled => eprintln!("Downloads are disabled"),
    }
}

fn print_report(report: &DownloadReport, quiet: bool) {
    let Some(tracker) = report.tracker() else {
        eprintln!("Downloads are disabled");
        return;
    };
    if !quiet {
        eprintln!(
            "Downloaded {} of {} ({} failed)",
            tracker.completed, tracker.total, tracker.failed
        );
    }
    for (id, reason) in tracker.failures() {
        eprintln!("  {}: {}", id, reason);
    }
}
