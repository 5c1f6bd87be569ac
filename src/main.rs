use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use implantmedic::llm;
use implantmedic::registry::DeviceRegistry;
use implantmedic::signal::{IncidentSignal, Metric, SignalSpec};
use implantmedic::storage::{self, SqliteStore};
use implantmedic::telemetry::EvidenceStore;
use implantmedic::triage::pipeline::TriagePipeline;
use implantmedic::triage::TriageError;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "implantmedic",
    about = "Appliance-grade incident triage for implanted device telemetry",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server backed by the local database)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Database path
        #[arg(long, default_value = "data/implantmedic.db")]
        db: String,
    },

    /// Populate the local database with the deterministic demo fleet
    Seed {
        /// Database path
        #[arg(long, default_value = "data/implantmedic.db")]
        db: String,
    },

    /// Investigate an incident signal and print the assembled case
    Investigate {
        /// Signal center longitude
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Signal center latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Search radius in meters
        #[arg(long, default_value = "5000")]
        radius: f64,

        /// Window start (RFC3339); default: 24h ago
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Window end (RFC3339); default: now
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Metric to investigate: neuralLatencyMs, cpuUsagePct or powerUsageUw
        #[arg(long, default_value = "cpuUsagePct")]
        metric: Metric,

        /// Anomaly threshold in the metric's unit
        #[arg(long, default_value = "90")]
        threshold: f64,

        /// Database path
        #[arg(long, default_value = "data/implantmedic.db")]
        db: String,
    },

    /// Print window averages for one device
    Stats {
        /// Device serial number
        #[arg(long)]
        serial: String,

        /// Window length in hours, ending now
        #[arg(long, default_value = "24")]
        hours: i64,

        /// Database path
        #[arg(long, default_value = "data/implantmedic.db")]
        db: String,
    },

    /// List device serials in a manufacturing lot
    Lot {
        /// Lot number
        #[arg(long)]
        number: String,

        /// Database path
        #[arg(long, default_value = "data/implantmedic.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, db } => {
            tracing::info!(%bind, "Starting Implantmedic daemon");
            implantmedic::serve(&bind, &db).await?;
        }
        Commands::Seed { db } => {
            let pool = storage::open_pool(&db)?;
            implantmedic::seed::seed_demo_data(&pool)?;
            println!("Demo data ready in {db}");
        }
        Commands::Investigate {
            lon,
            lat,
            radius,
            from,
            to,
            metric,
            threshold,
            db,
        } => {
            let now = Utc::now();
            let signal = IncidentSignal::new(SignalSpec {
                longitude: lon,
                latitude: lat,
                radius_meters: radius,
                from: from.unwrap_or(now - Duration::hours(24)),
                to: to.unwrap_or(now),
                metric,
                threshold,
            })?;

            let pool = storage::open_pool(&db)?;
            let store = Arc::new(SqliteStore::new(pool.clone()));
            let pipeline = TriagePipeline::new(
                store.clone(),
                store,
                Arc::new(llm::demo_completion()),
            );

            match pipeline.investigate(signal).await {
                Ok(case) => {
                    storage::save_case(&pool, &case)?;
                    print_case(&case);
                }
                Err(TriageError::Generation { outcome, source }) => {
                    // Generation failed but the triage artifacts are valid.
                    eprintln!("warning: hypothesis/plan generation failed: {source:#}");
                    println!("\n=== Implantmedic Triage (partial) ===");
                    println!("Risk:       {}", outcome.assessment.risk_level);
                    println!("Groups:     {}", outcome.assessment.evidence_group_count);
                    println!("Affected:   {}", outcome.affected.len());
                    println!("Blast:      {}", outcome.blast_radius.geo_summary);
                    println!("=====================================\n");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Stats { serial, hours, db } => {
            let pool = storage::open_pool(&db)?;
            let store = SqliteStore::new(pool);
            let to = Utc::now();
            let from = to - Duration::hours(hours);

            match store.aggregate_stats(&serial, from, to).await? {
                Some(stats) => {
                    println!("\nDevice {} (last {}h, {} samples)", serial, hours, stats.sample_count);
                    println!("  avg power:   {:.2} uW", stats.avg_power_uw);
                    println!("  avg cpu:     {:.1} %", stats.avg_cpu_pct);
                    println!("  avg latency: {:.1} ms", stats.avg_latency_ms);
                }
                None => println!("No telemetry for {serial} in the last {hours}h."),
            }
        }
        Commands::Lot { number, db } => {
            let pool = storage::open_pool(&db)?;
            let store = SqliteStore::new(pool);
            let serials = store.find_serials_by_lot(&number).await?;

            if serials.is_empty() {
                println!("No devices registered in lot {number}.");
            } else {
                println!("Lot {number}: {} device(s)", serials.len());
                for s in serials {
                    println!(" - {s}");
                }
            }
        }
    }

    Ok(())
}

fn print_case(case: &implantmedic::triage::IncidentCase) {
    println!("\n=== Implantmedic Incident Case ===");
    println!("Case:       {}", case.id);
    println!("Created:    {}", case.created_at.to_rfc3339());
    println!("Risk:       {}", case.assessment.risk_level);
    println!("Groups:     {}", case.assessment.evidence_group_count);
    println!("Geo:        {}", case.plan.estimated_blast_radius.geo_summary);
    println!("Window:     {}", case.plan.estimated_blast_radius.time_summary);
    println!(
        "Lots:       {}",
        case.plan.estimated_blast_radius.affected_lots.join(", ")
    );
    println!(
        "Models:     {}",
        case.plan.estimated_blast_radius.affected_models.join(", ")
    );

    println!("\nTop affected devices:");
    for d in case.affected.iter().take(10) {
        println!(
            " - {:<20} score {:.2}  lot {}  model {}",
            d.serial_number,
            d.anomaly_score,
            d.lot_number.as_deref().unwrap_or("?"),
            d.model.as_deref().unwrap_or("?")
        );
    }

    println!(
        "\nHypothesis: {:?} (confidence {:.0}%)",
        case.hypothesis.kind,
        case.hypothesis.confidence * 100.0
    );
    for e in &case.hypothesis.evidence {
        println!(" - {e}");
    }

    let approval = if case.plan.requires_approval {
        " (approval required)"
    } else {
        ""
    };
    println!("\nContainment plan{approval}:");
    for (i, step) in case.plan.steps.iter().enumerate() {
        println!(" {}. {}", i + 1, step.text);
    }

    if !case.gaps.is_empty() {
        println!("\nRegistry gaps:");
        for g in &case.gaps {
            println!(" - {}: {}", g.serial_number, g.detail);
        }
    }
    println!("==================================\n");
}
