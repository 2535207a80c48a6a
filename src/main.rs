use clap::{Parser, Subcommand};
use nightspot_scraper::config::Config;
use nightspot_scraper::logging;
use nightspot_scraper::pipeline::Pipeline;
use nightspot_scraper::server;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "nightspot_scraper")]
#[command(about = "Kakao Map night-venue data scraper")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the discovery crawl (stage 1)
    Discover,
    /// Run the merge and filter passes (stages 2-5)
    Filter,
    /// Run the review enrichment crawl (stage 6)
    Enrich,
    /// Upsert curated venues and reviews into the database
    Persist,
    /// Run the full pipeline end to end
    Run,
    /// Serve the admin HTTP trigger endpoints
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

fn print_summary(summary: &nightspot_scraper::pipeline::StageSummary) {
    println!(
        "   {}: {} processed, {} skipped, {} failed",
        summary.stage, summary.processed, summary.skipped, summary.failed
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)?;
    let pipeline = Arc::new(Pipeline::new(config));

    // Ctrl-C requests run-level cancellation: in-flight tasks finish their
    // current attempt, then the pool shuts down.
    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, finishing in-flight tasks");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Discover => {
            println!("🔍 Running discovery crawl...");
            let summary = pipeline.run_discovery().await?;
            println!("\n📊 Discovery results:");
            print_summary(&summary);
        }
        Commands::Filter => {
            println!("🧹 Running merge and filter passes...");
            for summary in pipeline.run_filters()? {
                print_summary(&summary);
            }
        }
        Commands::Enrich => {
            println!("📝 Running review enrichment...");
            let summary = pipeline.run_enrichment().await?;
            println!("\n📊 Enrichment results:");
            print_summary(&summary);
        }
        Commands::Persist => {
            println!("💾 Persisting curated data...");
            let summary = pipeline.run_persistence().await?;
            print_summary(&summary);
        }
        Commands::Run => {
            println!("🚀 Running full pipeline...");
            match pipeline.run_full().await {
                Ok(report) => {
                    println!("\n📊 Pipeline results:");
                    for summary in &report.stages {
                        print_summary(summary);
                    }
                    if report.cancelled {
                        println!("⚠️  Run was cancelled before completion");
                    } else {
                        info!("full pipeline run complete");
                        println!("✅ Full pipeline completed successfully!");
                    }
                }
                Err(e) => {
                    error!("pipeline run failed: {}", e);
                    println!("❌ Pipeline run failed: {e}");
                }
            }
        }
        Commands::Serve { port } => {
            server::start_server(pipeline, port).await?;
        }
    }
    Ok(())
}
