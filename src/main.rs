//! # Clinical decision-support CLI (`cdx`)
//!
//! ```bash
//! cdx --config ./config/cdx.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cdx status` | Backend availability, models, and features |
//! | `cdx interactions --med A --med B` | Drug-drug and drug-allergy check |
//! | `cdx suggest "<diagnosis>"` | Prescription suggestion with guideline fallback |
//! | `cdx instructions --medication M --dosage D --diagnosis X` | Patient instructions |
//! | `cdx search "<query>" --records r.json` | Retrieve and summarize history |
//! | `cdx ask "<question>" --records r.json` | Answer from the records only |
//! | `cdx embed --records r.json` | Compute missing record embeddings |
//! | `cdx serve` | Start the HTTP tool server |
//!
//! Results are printed to stdout as pretty JSON. Logs go to stderr and are
//! filtered by `RUST_LOG` (default `warn`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use clinical_assist::assistant::ClinicalAssistant;
use clinical_assist::config::{self, Config};
use clinical_assist::embedding::{encode_embedding, EmbeddingFormat};
use clinical_assist::models::{MedicalRecord, PrescriptionRequest};
use clinical_assist::server;
use clinical_assist::traits::ToolRegistry;

/// Clinical decision support: interaction checks, prescription
/// suggestions, and grounded search over patient history.
///
/// Works without a generative backend: rules, guidelines, and keyword
/// search stand in when it is unreachable.
#[derive(Parser)]
#[command(name = "cdx", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is absent.
    #[arg(long, global = true, default_value = "./config/cdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend availability, installed models, and feature flags.
    Status,

    /// Check medications for interactions and allergy conflicts.
    Interactions {
        /// Medication name (repeatable).
        #[arg(long = "med", required = true)]
        medications: Vec<String>,

        /// Documented allergy (repeatable).
        #[arg(long = "allergy")]
        allergies: Vec<String>,

        /// Rules and allergy check only; skip the backend analysis.
        #[arg(long)]
        no_llm: bool,
    },

    /// Suggest a prescription for a diagnosis.
    Suggest {
        diagnosis: String,

        #[arg(long)]
        age: Option<u32>,

        #[arg(long = "allergy")]
        allergies: Vec<String>,

        /// Medication the patient already takes (repeatable).
        #[arg(long = "current")]
        current_medications: Vec<String>,

        /// Other condition (repeatable).
        #[arg(long = "condition")]
        conditions: Vec<String>,
    },

    /// Generate patient-friendly instructions for a prescription.
    Instructions {
        #[arg(long)]
        medication: String,

        #[arg(long)]
        dosage: String,

        #[arg(long)]
        diagnosis: String,

        #[arg(long)]
        age: Option<u32>,
    },

    /// Find records relevant to a query and summarize them.
    Search {
        query: String,

        /// JSON file holding an array of records.
        #[arg(long)]
        records: PathBuf,

        #[arg(long)]
        patient: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,

        /// Print ranked hits only, without a summary.
        #[arg(long)]
        raw: bool,
    },

    /// Answer a question from the records only.
    Ask {
        question: String,

        #[arg(long)]
        records: PathBuf,

        #[arg(long)]
        patient: Option<String>,
    },

    /// Compute embeddings for records that lack a usable one.
    Embed {
        #[arg(long)]
        records: PathBuf,

        /// Emit each vector serialized for storage instead of as an array.
        #[arg(long, value_enum)]
        encode: Option<EncodeFormat>,
    },

    /// Start the HTTP tool server on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum EncodeFormat {
    Json,
    Blob,
}

impl From<EncodeFormat> for EmbeddingFormat {
    fn from(f: EncodeFormat) -> Self {
        match f {
            EncodeFormat::Json => EmbeddingFormat::Json,
            EncodeFormat::Blob => EmbeddingFormat::Blob,
        }
    }
}

#[derive(Serialize)]
struct EncodedRecord {
    id: i64,
    embedding: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    let assistant = ClinicalAssistant::from_config(&cfg)?;

    match cli.command {
        Commands::Status => print_json(&assistant.status().await)?,
        Commands::Interactions {
            medications,
            allergies,
            no_llm,
        } => {
            let verdict = assistant
                .check_interactions(&medications, &allergies, !no_llm)
                .await;
            print_json(&verdict)?;
        }
        Commands::Suggest {
            diagnosis,
            age,
            allergies,
            current_medications,
            conditions,
        } => {
            let request = PrescriptionRequest {
                diagnosis,
                age,
                allergies,
                current_medications,
                conditions,
            };
            print_json(&assistant.suggest_prescription(&request).await)?;
        }
        Commands::Instructions {
            medication,
            dosage,
            diagnosis,
            age,
        } => {
            let response = assistant
                .generate_instructions(&medication, &dosage, &diagnosis, age)
                .await;
            print_json(&response)?;
        }
        Commands::Search {
            query,
            records,
            patient,
            top_k,
            raw,
        } => {
            let records = load_records(&records)?;
            if raw {
                print_json(&assistant.search(&query, &records, top_k, None).await)?;
            } else {
                let summary = assistant
                    .search_history(&query, &records, patient.as_deref(), top_k)
                    .await;
                print_json(&summary)?;
            }
        }
        Commands::Ask {
            question,
            records,
            patient,
        } => {
            let records = load_records(&records)?;
            let answer = assistant
                .ask_about_patient(&question, &records, patient.as_deref())
                .await;
            print_json(&answer)?;
        }
        Commands::Embed { records, encode } => {
            let records = load_records(&records)?;
            let backfill = assistant.embed_records(&records).await;
            match encode {
                None => print_json(&backfill)?,
                Some(format) => {
                    let encoded: Vec<EncodedRecord> = backfill
                        .embedded
                        .iter()
                        .map(|r| EncodedRecord {
                            id: r.id,
                            embedding: encode_embedding(&r.embedding, format.into()),
                        })
                        .collect();
                    print_json(&serde_json::json!({
                        "embedded": encoded,
                        "failed": backfill.failed,
                        "skipped": backfill.skipped,
                    }))?;
                }
            }
            if !backfill.failed.is_empty() {
                eprintln!("{} record(s) could not be embedded", backfill.failed.len());
            }
        }
        Commands::Serve => {
            server::run_server_with_tools(&cfg, Arc::new(assistant), ToolRegistry::with_builtins())
                .await?;
        }
    }

    Ok(())
}

/// Load the config file, or fall back to defaults when it does not exist.
/// A file that exists but does not parse or validate is an error.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

fn load_records(path: &Path) -> Result<Vec<MedicalRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records file: {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
