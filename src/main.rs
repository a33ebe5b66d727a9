//! anchor CLI - Command line interface for smt_anchor
//!
//! Registers doctors and prescriptions, anchors their trees and drives the
//! reconciliation worker. Output is JSON on stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use smt_anchor::{
    AnchorConfig, AnchorService, FieldElement, LedgerClient, MockLedger, MockProver,
    NewDoctor, NewPrescription, ReconciliationWorker, Store, TreeKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anchor")]
#[command(about = "Sparse Merkle tree index for records, anchored to a ledger")]
#[command(version)]
struct Cli {
    /// Path to the database file [default: from config, else anchors.smt]
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Ledger backend
    #[arg(long, default_value = "instant")]
    ledger: LedgerMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum LedgerMode {
    /// In-process ledger that confirms every submission
    Instant,
    /// No ledger; records are stored without anchoring
    Offline,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init,

    /// Doctor registry
    Doctor {
        #[command(subcommand)]
        command: DoctorCommands,
    },

    /// Prescriptions
    Prescription {
        #[command(subcommand)]
        command: PrescriptionCommands,
    },

    /// Show tree roots
    Root {
        /// doctors or prescriptions (both if omitted)
        kind: Option<TreeKind>,
    },

    /// Inclusion proof for a record
    Proof {
        kind: TreeKind,
        id: u64,
    },

    /// Show pending anchor entries
    Queue {
        kind: Option<TreeKind>,
    },

    /// Run one reconciliation tick
    Reconcile,

    /// Reconcile periodically until interrupted
    Watch {
        /// Seconds between ticks [default: from config]
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand)]
enum DoctorCommands {
    /// Register a doctor
    Create {
        #[arg(long)]
        license: u64,
        #[arg(long)]
        user_id: u64,
    },
}

#[derive(Subcommand)]
enum PrescriptionCommands {
    /// Issue a prescription
    Create {
        #[arg(long)]
        doctor: u64,
        #[arg(long)]
        presentation: u64,
        #[arg(long)]
        patient: u64,
        #[arg(long, default_value = "1")]
        quantity: u64,
    },

    /// Mark a prescription as dispensed
    Use {
        id: u64,
        #[arg(long)]
        pharmacist: u64,
    },

    /// Check a prescription against the anchored root
    Verify { id: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AnchorConfig::resolve()?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if cli.ledger == LedgerMode::Offline {
        config.anchoring_enabled = false;
    }

    let command = match cli.command {
        Commands::Init => {
            Store::create(&config.database)?;
            return output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created database at {}", config.database.display())
                }),
            );
        }
        command => command,
    };

    let store = Arc::new(Store::open_or_create(&config.database)?);
    let ledger = open_ledger(&store);
    let service = Arc::new(AnchorService::new(
        store,
        ledger,
        Arc::new(MockProver::new()),
        config.clone(),
    )?);
    let worker = Arc::new(ReconciliationWorker::new(service.clone()));

    match command {
        Commands::Init => {}

        Commands::Doctor {
            command: DoctorCommands::Create { license, user_id },
        } => {
            let doctor = service.create_doctor(NewDoctor { license, user_id }).await?;
            worker.run_once().await?;
            output(cli.format, &serde_json::to_value(&doctor)?)?;
        }

        Commands::Prescription { command } => match command {
            PrescriptionCommands::Create {
                doctor,
                presentation,
                patient,
                quantity,
            } => {
                let prescription = service
                    .create_prescription(NewPrescription {
                        doctor_id: doctor,
                        presentation_id: presentation,
                        patient_id: patient,
                        quantity,
                        emitted_at: None,
                    })
                    .await?;
                worker.run_once().await?;
                output(cli.format, &serde_json::to_value(&prescription)?)?;
            }
            PrescriptionCommands::Use { id, pharmacist } => {
                let prescription = service.mark_prescription_used(id, pharmacist).await?;
                worker.run_once().await?;
                output(cli.format, &serde_json::to_value(&prescription)?)?;
            }
            PrescriptionCommands::Verify { id } => {
                let valid = service.verify_prescription(id).await?;
                output(cli.format, &serde_json::json!({ "id": id, "valid": valid }))?;
            }
        },

        Commands::Root { kind } => {
            let kinds = kind.map_or(TreeKind::ALL.to_vec(), |k| vec![k]);
            let mut roots = serde_json::Map::new();
            for kind in kinds {
                roots.insert(kind.to_string(), service.root(kind).to_hex().into());
            }
            output(cli.format, &serde_json::Value::Object(roots))?;
        }

        Commands::Proof { kind, id } => {
            let proof = service.inclusion_proof(kind, id)?;
            output(cli.format, &serde_json::to_value(&proof)?)?;
        }

        Commands::Queue { kind } => {
            let kinds = kind.map_or(TreeKind::ALL.to_vec(), |k| vec![k]);
            let mut queues = serde_json::Map::new();
            for kind in kinds {
                queues.insert(kind.to_string(), serde_json::to_value(service.queue(kind))?);
            }
            output(cli.format, &serde_json::Value::Object(queues))?;
        }

        Commands::Reconcile => {
            let report = worker.run_once().await?;
            output(cli.format, &serde_json::to_value(&report)?)?;
        }

        Commands::Watch { interval } => {
            let interval = interval.map_or(config.interval, Duration::from_secs);
            let handle = worker.spawn(interval);
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await;
            output(cli.format, &serde_json::json!({ "status": "stopped" }))?;
        }
    }

    Ok(())
}

/// An instant ledger that already holds the current roots as anchored
fn open_ledger(store: &Store) -> Arc<dyn LedgerClient> {
    let mut ledger = MockLedger::instant();
    for kind in TreeKind::ALL {
        let root = store.read(|state| state.root(kind));
        if root != FieldElement::ZERO {
            ledger = ledger.with_anchored_root(kind, root);
        }
    }
    Arc::new(ledger)
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
