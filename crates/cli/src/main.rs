use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tosse_core::{
    config::{max_history_from_env_value, stage_delays_from_env_value},
    export::default_export_filename,
    AnalysisStage, AudioSample, CoreConfig, HistoryRecord, PatientDraft, ResultId, ResultStore,
    StubAnalyzer, WorkflowController, DEFAULT_DATA_DIR,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tosse")]
#[command(about = "TOSSE cough triage CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all history records, newest first
    List,
    /// Show the report for one record
    Show {
        /// Result identifier (e.g. TOSSE-4K2Z9QX)
        id: String,
    },
    /// Delete one record
    Delete {
        /// Result identifier
        id: String,
    },
    /// Export the whole history as plain text
    Export {
        /// Output file (defaults to tosse_history_<date>.txt)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Register a patient and run an analysis
    Analyse {
        /// Patient full name
        name: String,
        /// Date of birth (YYYY-MM-DD)
        birth_date: String,
        /// Patient address
        address: String,
        /// Contact phone (optional)
        #[arg(long)]
        phone: Option<String>,
        /// Confirms the patient consented to the recording
        #[arg(long)]
        consent: bool,
        /// Recorded audio length in seconds
        #[arg(long, default_value_t = 3.0)]
        duration: f64,
    },
    /// Re-run the analysis for an existing record, replacing it
    Edit {
        /// Result identifier of the record to replace
        id: String,
        /// New patient name
        #[arg(long)]
        name: Option<String>,
        /// New date of birth (YYYY-MM-DD)
        #[arg(long)]
        birth_date: Option<String>,
        /// New address
        #[arg(long)]
        address: Option<String>,
        /// New contact phone
        #[arg(long)]
        phone: Option<String>,
        /// Recorded audio length in seconds
        #[arg(long, default_value_t = 3.0)]
        duration: f64,
    },
}

fn load_config() -> Result<CoreConfig, Box<dyn std::error::Error>> {
    let data_dir = std::env::var("TOSSE_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into());
    let stage_delays = stage_delays_from_env_value(std::env::var("TOSSE_STAGE_DELAYS_MS").ok())?;
    let max_history = max_history_from_env_value(std::env::var("TOSSE_MAX_HISTORY").ok())?;
    Ok(CoreConfig::new(
        PathBuf::from(data_dir),
        stage_delays,
        max_history,
    )?)
}

fn print_report(record: &HistoryRecord) {
    let patient = &record.patient;
    let result = &record.result;
    let taken = result.timestamp().with_timezone(&Local);
    let (top, top_value) = result.probabilities().top();

    println!("Document ID: {}", result.id());
    println!("Patient: {}", patient.name);
    println!(
        "Age: {} years",
        patient.age_on(taken.date_naive())
    );
    println!("Address: {}", patient.address);
    println!(
        "Phone: {}",
        patient.phone.as_deref().unwrap_or("Not provided")
    );
    println!("Date: {}", taken.format("%d/%m/%Y %H:%M:%S"));
    println!("Audio duration: {:.1}s", result.audio_duration());
    println!("Risk level: {}", result.risk_level());
    println!("Primary finding: {} ({}%)", top, top_value);
    for (condition, value) in result.probabilities().ranked() {
        println!("  {:<12} {:>5}%", condition.label(), value);
    }
    println!("Clinical note: {}", result.clinical_note());
}

/// Prints stage notifications while an analysis runs.
fn spawn_progress_printer() -> (mpsc::UnboundedSender<AnalysisStage>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<AnalysisStage>();
    let handle = tokio::spawn(async move {
        while let Some(stage) = rx.recv().await {
            println!(
                "[{}/{}] {}",
                stage.index() + 1,
                AnalysisStage::ALL.len(),
                stage
            );
        }
    });
    (tx, handle)
}

async fn run_analysis(
    controller: &mut WorkflowController,
    duration: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, printer) = spawn_progress_printer();
    let outcome = controller
        .analyze(AudioSample::empty(), duration, Some(tx))
        .await
        .map(|result| result.id().clone());
    // The sender was moved into the analyzer and is dropped by now, so the printer drains.
    let _ = printer.await;

    let id = outcome.map_err(|e| {
        tracing::warn!("analysis did not complete: {:?}", e);
        e
    })?;
    if let Some(record) = controller.store().get(&id) {
        print_report(record);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tosse_core=warn".parse()?)
                .add_directive("tosse=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = load_config()?;
    let store = ResultStore::open(&cfg);
    tracing::debug!(
        "opened history at {} with {} records",
        store.path().display(),
        store.len()
    );

    match cli.command {
        Some(Commands::List) => {
            if store.is_empty() {
                println!("No history records found.");
            } else {
                for record in store.list() {
                    println!(
                        "ID: {}, Patient: {}, Risk: {}, Date: {}",
                        record.id(),
                        record.patient.name,
                        record.result.risk_level(),
                        record
                            .result
                            .timestamp()
                            .with_timezone(&Local)
                            .format("%d/%m/%Y %H:%M")
                    );
                }
            }
        }
        Some(Commands::Show { id }) => {
            let id = ResultId::parse(&id)?;
            match store.get(&id) {
                Some(record) => print_report(record),
                None => eprintln!("No record with ID: {}", id),
            }
        }
        Some(Commands::Delete { id }) => {
            let id = ResultId::parse(&id)?;
            let mut controller =
                WorkflowController::new(store, Arc::new(StubAnalyzer::from_config(&cfg)));
            controller.view_history()?;
            match controller.delete_record(&id) {
                Ok(true) => println!("Deleted record: {}", id),
                Ok(false) => println!("No record with ID: {}", id),
                Err(e) => eprintln!("Error deleting record: {}", e),
            }
        }
        Some(Commands::Export { output }) => {
            let controller =
                WorkflowController::new(store, Arc::new(StubAnalyzer::from_config(&cfg)));
            match controller.export_history(&Local) {
                Ok(text) => {
                    let path = output.unwrap_or_else(|| {
                        PathBuf::from(default_export_filename(Utc::now().date_naive()))
                    });
                    std::fs::write(&path, text)?;
                    println!("Exported history to: {}", path.display());
                }
                Err(e) => eprintln!("Error exporting history: {}", e),
            }
        }
        Some(Commands::Analyse {
            name,
            birth_date,
            address,
            phone,
            consent,
            duration,
        }) => {
            let draft = PatientDraft {
                name,
                birth_date,
                address,
                phone: phone.unwrap_or_default(),
                consent,
            };
            let mut controller =
                WorkflowController::new(store, Arc::new(StubAnalyzer::from_config(&cfg)));
            controller.start_new()?;
            if let Err(e) = controller.submit_registration(&draft) {
                eprintln!("Error registering patient: {}", e);
                return Ok(());
            }
            if let Err(e) = run_analysis(&mut controller, duration).await {
                eprintln!("Error running analysis: {}", e);
            }
        }
        Some(Commands::Edit {
            id,
            name,
            birth_date,
            address,
            phone,
            duration,
        }) => {
            let id = ResultId::parse(&id)?;
            let mut controller =
                WorkflowController::new(store, Arc::new(StubAnalyzer::from_config(&cfg)));
            controller.view_history()?;
            if let Err(e) = controller.edit_record(&id) {
                eprintln!("Error opening record: {}", e);
                return Ok(());
            }

            let mut draft = controller.registration_draft();
            if let Some(name) = name {
                draft.name = name;
            }
            if let Some(birth_date) = birth_date {
                draft.birth_date = birth_date;
            }
            if let Some(address) = address {
                draft.address = address;
            }
            if let Some(phone) = phone {
                draft.phone = phone;
            }

            if let Err(e) = controller.submit_registration(&draft) {
                eprintln!("Error updating patient: {}", e);
                return Ok(());
            }
            if let Err(e) = run_analysis(&mut controller, duration).await {
                eprintln!("Error running analysis: {}", e);
            }
        }
        None => {
            println!("Use 'tosse --help' for commands");
        }
    }

    Ok(())
}
