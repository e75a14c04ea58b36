use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use discovery_pipeline::config::{LoggingConfig, PipelineConfig};
use discovery_pipeline::detect::{IncidentStore, LogEscalation};
use discovery_pipeline::scheduler::PipelineStatus;
use discovery_pipeline::storage::{self, SqliteSink};

#[derive(Parser)]
#[command(
    name = "discovery-pipeline",
    about = "Cron-driven discovery pipeline with admission control and health reporting",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (job timers + health snapshots)
    Serve,

    /// Run one job immediately and print its result
    Run {
        /// Job id
        job: String,
    },

    /// Show the latest persisted health snapshot
    Status {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show recent execution records
    History {
        /// Number of records to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only show records for this job
        #[arg(long)]
        job: Option<String>,
    },

    /// Inspect the configured job table
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Show recent critical-failure incidents
    Incidents {
        /// Number of incidents to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List configured jobs
    List,

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_status(status: &PipelineStatus) {
    let s = &status.stats;
    println!("\n=== Discovery Pipeline Status ===");
    println!("Captured:     {}", status.captured_at);
    println!("Running:      {}", status.running);
    println!("Health:       {}", status.health.as_str());
    println!("Success rate: {:.1}%", status.success_rate);
    println!(
        "Executions:   {} total, {} ok, {} failed ({} timed out), {} critical",
        s.total_executions,
        s.successful_executions,
        s.failed_executions,
        s.timed_out_executions,
        s.critical_failures
    );
    println!("Avg duration: {:.0} ms", s.average_duration_ms);
    println!("Deferred:     {}", s.deferred_admissions);
    println!("Active:       {}", status.active_executions.len());
    println!("Jobs:         {}", status.jobs.join(", "));
    println!("=================================\n");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::resolve(cli.config.as_deref())?;

    // Initialize tracing
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve => {
            tracing::info!(jobs = config.jobs.len(), "Starting discovery pipeline daemon");
            discovery_pipeline::serve(config).await?;
        }
        Commands::Run { job } => {
            let pool = storage::open_pool(&config.storage.db_path)?;
            let sink = Arc::new(SqliteSink::new(pool.clone()));
            let incidents = Arc::new(IncidentStore::new(pool));
            let orchestrator = discovery_pipeline::build_orchestrator(&config, sink, incidents).await?;

            let result = orchestrator.run_job(&job).await;
            // Make sure the record is written before exiting.
            orchestrator.engine().flush().await;

            let value = result?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Status { json } => {
            let pool = storage::open_pool(&config.storage.db_path)?;
            match storage::latest_snapshot(&pool)? {
                Some(status) if json => println!("{}", serde_json::to_string_pretty(&status)?),
                Some(status) => print_status(&status),
                None => {
                    // Nothing persisted yet: report the configured, idle pipeline.
                    let orchestrator = discovery_pipeline::build_orchestrator(
                        &config,
                        Arc::new(storage::MemorySink::new()),
                        Arc::new(LogEscalation),
                    )
                    .await?;
                    let status = orchestrator.get_pipeline_status().await;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&status)?);
                    } else {
                        println!("No health snapshots recorded yet.");
                        print_status(&status);
                    }
                }
            }
        }
        Commands::History { limit, job } => {
            let pool = storage::open_pool(&config.storage.db_path)?;
            let records = storage::list_records(&pool, limit, job.as_deref())?;
            if records.is_empty() {
                println!("No executions recorded.");
            } else {
                println!(
                    "{:<26} | {:<20} | {:<9} | {:<10} | {:>9} | Error",
                    "Started", "Job", "Trigger", "Status", "Duration"
                );
                println!("{:-<26}-|-{:-<20}-|-{:-<9}-|-{:-<10}-|-{:->9}-|-{:-<20}", "", "", "", "", "", "");
                for r in records {
                    let flag = if r.critical { " [CRITICAL]" } else { "" };
                    println!(
                        "{:<26} | {:<20} | {:<9} | {:<10} | {:>7}ms | {}{}",
                        r.started_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                        r.job_id,
                        r.trigger.as_str(),
                        r.status.as_str(),
                        r.duration_ms,
                        r.error.as_deref().unwrap_or(""),
                        flag
                    );
                }
            }
        }
        Commands::Jobs { action } => match action {
            JobsAction::List => {
                if config.jobs.is_empty() {
                    println!("No jobs configured.");
                } else {
                    println!("{:<20} | {:<15} | {:<8} | {:<8} | Enabled", "Id", "Cron", "Priority", "Kind");
                    println!("{:-<20}-|-{:-<15}-|-{:-<8}-|-{:-<8}-|-{:-<7}", "", "", "", "", "");
                    for job in &config.jobs {
                        println!(
                            "{:<20} | {:<15} | {:<8} | {:<8} | {}",
                            job.id,
                            job.schedule,
                            job.priority,
                            job.collector.kind(),
                            job.enabled
                        );
                    }
                }
            }
            JobsAction::DryRun { hours } => {
                let orchestrator = discovery_pipeline::build_orchestrator(
                    &config,
                    Arc::new(storage::MemorySink::new()),
                    Arc::new(LogEscalation),
                )
                .await?;
                let preview = orchestrator.preview(hours).await;
                if preview.is_empty() {
                    println!("No runs scheduled in next {} hours.", hours);
                } else {
                    println!("Upcoming runs (next {} hours):", hours);
                    for run in preview {
                        println!("{} : {} (priority {})", run.at, run.job_id, run.priority);
                    }
                }
            }
        },
        Commands::Incidents { limit } => {
            let pool = storage::open_pool(&config.storage.db_path)?;
            let incidents = IncidentStore::new(pool).list_recent(limit)?;
            if incidents.is_empty() {
                println!("No incidents recorded.");
            } else {
                for incident in incidents {
                    println!(
                        "{} [{}] {} : {}",
                        incident.created_at, incident.severity, incident.verdict, incident.evidence
                    );
                }
            }
        }
    }

    Ok(())
}
