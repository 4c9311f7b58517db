//! newsbrief CLI entry point

use clap::{Parser, Subcommand};
use newsbrief::api::SearchFilter;
use newsbrief::cancel::cancel_pair;
use newsbrief::config::Config;
use newsbrief::error::Result;
use newsbrief::store::{ArticleKind, Category};
use newsbrief::App;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "newsbrief")]
#[command(version, about = "Personalized news-digest engine", long_about = None)]
struct Cli {
    /// Path to config file (defaults to ./newsbrief.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: scrape, process, digest, index, rank, email
    Run {
        /// Scraping window in hours
        #[arg(long)]
        hours: Option<i64>,

        /// Number of ranked items to email
        #[arg(long)]
        top_n: Option<usize>,

        /// Render the digest without sending mail
        #[arg(long)]
        skip_email: bool,
    },

    /// Harvest sources without summarizing or emailing
    Scrape {
        /// Scraping window in hours
        #[arg(long)]
        hours: Option<i64>,
    },

    /// Email the current window's summaries immediately
    Send {
        #[arg(long)]
        hours: Option<i64>,

        #[arg(long)]
        top_n: Option<usize>,

        /// Override the configured recipient
        #[arg(long)]
        recipient: Option<String>,

        /// Override the subject line
        #[arg(long)]
        subject: Option<String>,
    },

    /// Semantic search over indexed summaries
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "5")]
        limit: usize,

        /// Filter by article kind (video, web)
        #[arg(long)]
        kind: Option<ArticleKind>,

        /// Filter by category (official, research, news, safety)
        #[arg(long)]
        category: Option<Category>,
    },

    /// List summaries in the window
    Summaries {
        #[arg(long)]
        hours: Option<i64>,

        #[arg(long, default_value = "1")]
        page: u64,

        #[arg(long, default_value = "20")]
        page_size: u64,
    },

    /// Show record, index, and last-run statistics
    Stats,

    /// List recently harvested items
    Items {
        /// Article kind (video, web)
        kind: ArticleKind,

        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("newsbrief=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsbrief=info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    if let Err(e) = execute(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    // Init works without loading (and validating) an existing config
    if let Commands::Init { force } = &cli.command {
        return cmd_init(cli.config.as_deref(), *force);
    }

    let config = Config::load_or_default(cli.config.as_deref())?;
    let app = App::init(config).await?;
    let (handle, cancel) = cancel_pair();

    // Ctrl-C requests cooperative cancellation; stages stop at the next
    // boundary
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    match cli.command {
        Commands::Run {
            hours,
            top_n,
            skip_email,
        } => {
            let skip = if skip_email { Some(true) } else { None };
            let outcome = app.run(hours, top_n, skip, &cancel).await?;
            let run = &outcome.run;
            println!("Run {} finished: {}", run.id, run.status);
            println!(
                "  scraped={} new={} summarized={} indexed={} ranked={} emailed={} skipped={}",
                run.scraped,
                run.new_items,
                run.summarized,
                run.indexed,
                run.ranked,
                run.emailed,
                run.skipped
            );
            let failed_adapters = run.failed_adapters();
            if !failed_adapters.is_empty() {
                println!("  failed adapters: {}", failed_adapters.join(", "));
            }
            if let Some(html) = outcome.rendered_html {
                if run.emailed == 0 {
                    println!("\n--- rendered digest ({} bytes) ---", html.len());
                }
            }
        }

        Commands::Scrape { hours } => {
            let run = app.scrape(hours, &cancel).await?;
            println!(
                "Scrape {} finished: {} (scraped={} new={})",
                run.id, run.status, run.scraped, run.new_items
            );
        }

        Commands::Send {
            hours,
            top_n,
            recipient,
            subject,
        } => {
            let report = app
                .send_digest(
                    hours,
                    top_n,
                    recipient.as_deref(),
                    subject.as_deref(),
                    &cancel,
                )
                .await?;
            println!(
                "Sent {} items at {}",
                report.count,
                report.sent_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        Commands::Search {
            query,
            limit,
            kind,
            category,
        } => {
            let filter = SearchFilter { kind, category };
            let hits = app.search(&query, limit, &filter).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({})",
                    i + 1,
                    hit.score,
                    hit.meta.title,
                    hit.meta.source_name
                );
                println!("   {}", hit.meta.url);
            }
        }

        Commands::Summaries {
            hours,
            page,
            page_size,
        } => {
            let result = app.list_summaries(hours, page, page_size).await?;
            println!(
                "{} summaries (page {} of {})",
                result.total,
                result.page,
                result.total.div_ceil(result.page_size).max(1)
            );
            for summary in &result.items {
                println!(
                    "- [{}] {} ({})",
                    summary.article_kind, summary.title, summary.source_name
                );
                println!("  {}", summary.summary);
            }
        }

        Commands::Stats => {
            let stats = app.stats().await?;
            println!("Videos:     {}", stats.counts.videos);
            println!("Web items:  {}", stats.counts.web_items);
            println!(
                "Summaries:  {} ({} duplicates)",
                stats.counts.summaries, stats.counts.duplicates
            );
            println!("Indexed:    {}", stats.indexed);
            match stats.last_run {
                Some(run) => println!(
                    "Last run:   {} ({}, started {})",
                    run.id,
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M UTC")
                ),
                None => println!("Last run:   never"),
            }
        }

        Commands::Items { kind, limit } => match app.get_items(kind, limit).await? {
            newsbrief::api::ItemList::Videos(videos) => {
                for v in videos {
                    println!(
                        "- {} [{}] {}",
                        v.published_at.format("%Y-%m-%d"),
                        v.channel_id,
                        v.title
                    );
                }
            }
            newsbrief::api::ItemList::Web(items) => {
                for w in items {
                    println!(
                        "- {} [{}] {}",
                        w.published_at.format("%Y-%m-%d"),
                        w.source_name,
                        w.title
                    );
                }
            }
        },

        Commands::Init { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn cmd_init(path: Option<&std::path::Path>, force: bool) -> Result<()> {
    use newsbrief::config::default_catalog;

    let path = path.unwrap_or_else(|| std::path::Path::new("newsbrief.toml"));
    if path.exists() && !force {
        return Err(newsbrief::Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    let mut config = Config::default();
    config.sources = default_catalog();
    config.save(path)?;
    println!("Wrote starter config to {}", path.display());
    println!("Set the model API key and SMTP password environment variables before running.");
    Ok(())
}
