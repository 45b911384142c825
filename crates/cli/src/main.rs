use clap::{Parser, Subcommand};
use concept_ids::RecordId;
use concepts_core::config::{path_from_env_value, storage_key_from_env_value};
use concepts_core::constants::{DEFAULT_CONFIG_PATH, DEFAULT_STORAGE_DIR};
use concepts_core::{
    ConceptManager, ConceptStateStore, EngineConfig, FieldConventions, FileKeyValueStore,
    SiteEvaluation, TestPatientManager,
};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "concepts")]
#[command(about = "Concept expression engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the distinct concepts the configuration references
    Concepts,
    /// List every expression site in the configuration
    Sites,
    /// Evaluate an expression against the default instantiation or a stored snapshot
    Eval {
        /// Expression text, e.g. "[%{Weight.value} > 50%]"
        expression: String,
        /// Test patient ID
        #[arg(long)]
        patient: Option<String>,
        /// Test case ID (requires --patient)
        #[arg(long, requires = "patient")]
        case: Option<String>,
    },
    /// List test patients and their test cases
    Patients,
    /// Create a test patient from the default instantiation
    CreatePatient {
        /// Patient name
        name: String,
        /// Free-text details (optional)
        #[arg(long, default_value = "")]
        details: String,
    },
    /// Create a test case for a test patient
    CreateCase {
        /// Test patient ID
        patient: String,
        /// Test case name
        name: String,
        /// Free-text details (optional)
        #[arg(long, default_value = "")]
        details: String,
    },
    /// Delete a test patient and all of its test cases
    DeletePatient {
        /// Test patient ID
        patient: String,
    },
    /// Delete one test case
    DeleteCase {
        /// Test patient ID
        patient: String,
        /// Test case ID
        case: String,
    },
    /// Set a concept value on a test patient or test case
    SetValue {
        /// Test patient ID
        patient: String,
        /// Test case ID (optional)
        #[arg(long)]
        case: Option<String>,
        /// Concept name
        name: String,
        /// JSON value; anything that is not valid JSON is stored as a string
        value: String,
    },
    /// Set a concept's activation flag on a test patient or test case
    SetActive {
        /// Test patient ID
        patient: String,
        /// Test case ID (optional)
        #[arg(long)]
        case: Option<String>,
        /// Concept name
        name: String,
        /// true or false
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Evaluate every expression site against a test patient or test case
    Report {
        /// Test patient ID
        patient: String,
        /// Test case ID (optional)
        #[arg(long)]
        case: Option<String>,
    },
    /// Print the test patient collection as JSON
    Export,
    /// Replace the test patient collection with the contents of a JSON file
    Import {
        /// Path to an exported collection
        file: String,
    },
}

/// Resolves the engine configuration from the environment.
///
/// # Environment Variables
/// - `CONCEPT_CONFIG_PATH`: configuration document (default: "config/rconfig.json")
/// - `CONCEPT_STORAGE_DIR`: test patient storage directory (default: "concept_data")
/// - `CONCEPT_STORAGE_KEY`: test patient storage key (default: "testPatients")
fn resolve_config() -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let config_path = path_from_env_value(
        std::env::var("CONCEPT_CONFIG_PATH").ok(),
        DEFAULT_CONFIG_PATH,
    );
    let storage_dir = path_from_env_value(
        std::env::var("CONCEPT_STORAGE_DIR").ok(),
        DEFAULT_STORAGE_DIR,
    );
    let storage_key = storage_key_from_env_value(std::env::var("CONCEPT_STORAGE_KEY").ok())?;

    Ok(EngineConfig::new(
        config_path,
        storage_dir,
        storage_key,
        FieldConventions::default(),
    )?)
}

fn print_report(results: &[SiteEvaluation]) {
    if results.is_empty() {
        println!("No expression sites found.");
        return;
    }
    for result in results {
        println!("{:<5} {}  {}", result.result, result.path, result.expression);
    }
}

fn created_at(id: &str) -> String {
    match RecordId::parse(id) {
        Ok(id) => id.timestamp().to_rfc3339(),
        Err(_) => "unknown".into(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("concepts=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'concepts --help' for commands");
        return Ok(());
    };

    let cfg = Arc::new(resolve_config()?);
    let mut manager = ConceptManager::new(cfg.clone(), Arc::new(ConceptStateStore::new()));
    manager.load_configuration().await?;

    let storage = Arc::new(FileKeyValueStore::new(cfg.storage_dir()));
    let mut harness = TestPatientManager::new(storage, cfg.storage_key());
    harness.load();

    match command {
        Commands::Concepts => {
            if manager.distinct_concepts().is_empty() {
                println!("No concepts found.");
            }
            for name in manager.distinct_concepts() {
                let sites = manager.extraction().sites_referencing(name).count();
                println!("{} ({} sites)", name, sites);
            }
        }
        Commands::Sites => {
            for site in manager.concept_expressions() {
                println!(
                    "{}  [{:?}]  {}  -> {}",
                    site.path,
                    site.kind,
                    site.expression,
                    site.concepts.join(", ")
                );
            }
        }
        Commands::Eval {
            expression,
            patient,
            case,
        } => {
            let result = match patient {
                Some(patient) => {
                    if harness.concepts_for(&patient, case.as_deref()).is_none() {
                        eprintln!("No such test patient or test case");
                    }
                    harness.evaluate_expression(&patient, case.as_deref(), &expression)
                }
                None => match manager.try_evaluate_expression(&expression) {
                    Ok(result) => result,
                    Err(e) => {
                        eprintln!("Error evaluating expression: {}", e);
                        false
                    }
                },
            };
            println!("{}", result);
        }
        Commands::Patients => {
            if harness.test_patients().is_empty() {
                println!("No test patients found.");
            }
            for patient in harness.test_patients() {
                println!(
                    "ID: {}, Name: {}, Created: {}",
                    patient.id,
                    patient.name,
                    created_at(&patient.id)
                );
                for case in &patient.test_cases {
                    println!("    Case ID: {}, Name: {}", case.id, case.name);
                }
            }
        }
        Commands::CreatePatient { name, details } => {
            let patient = harness.create_test_patient_from(&manager, &name, &details);
            println!("Created test patient with ID: {}", patient.id);
        }
        Commands::CreateCase {
            patient,
            name,
            details,
        } => match harness.create_test_case_from(&patient, &manager, &name, &details) {
            Some(case) => println!("Created test case with ID: {}", case.id),
            None => eprintln!("Error creating test case: no test patient {}", patient),
        },
        Commands::DeletePatient { patient } => {
            if harness.delete_test_patient(&patient) {
                println!("Deleted test patient: {}", patient);
            } else {
                eprintln!("Error deleting test patient: no test patient {}", patient);
            }
        }
        Commands::DeleteCase { patient, case } => {
            if harness.delete_test_case(&patient, &case) {
                println!("Deleted test case: {}", case);
            } else {
                eprintln!("Error deleting test case: {} has no test case {}", patient, case);
            }
        }
        Commands::SetValue {
            patient,
            case,
            name,
            value,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let updated = match &case {
                Some(case) => harness.set_case_concept_value(&patient, case, &name, value),
                None => harness.set_patient_concept_value(&patient, &name, value),
            };
            if updated {
                println!("Updated {}", name);
            } else {
                eprintln!("Error setting value: no such test patient or test case");
            }
        }
        Commands::SetActive {
            patient,
            case,
            name,
            active,
        } => {
            let updated = match &case {
                Some(case) => harness.set_case_concept_active(&patient, case, &name, active),
                None => harness.set_patient_concept_active(&patient, &name, active),
            };
            if updated {
                println!("Updated {}", name);
            } else {
                eprintln!("Error setting active flag: no such test patient or test case");
            }
        }
        Commands::Report { patient, case } => {
            match harness.evaluate_all_sites(
                &patient,
                case.as_deref(),
                manager.concept_expressions(),
            ) {
                Some(results) => print_report(&results),
                None => eprintln!("No such test patient or test case"),
            }
        }
        Commands::Export => {
            println!("{}", harness.export_json()?);
        }
        Commands::Import { file } => {
            let text = tokio::fs::read_to_string(&file).await?;
            let count = harness.import_json(&text)?;
            println!("Imported {} test patients", count);
        }
    }

    Ok(())
}
