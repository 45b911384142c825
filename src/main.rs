use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concepts_core::config::{path_from_env_value, storage_key_from_env_value};
use concepts_core::constants::{DEFAULT_CONFIG_PATH, DEFAULT_STORAGE_DIR};
use concepts_core::{
    ConceptManager, ConceptStateStore, EngineConfig, FieldConventions, FileKeyValueStore,
    TestPatientManager,
};

/// Boots the concept engine once and prints a JSON evaluation report.
///
/// Loads the configuration document, extracts its concepts, reads the stored test patients,
/// then evaluates every expression site against the default instantiation and against each
/// test patient and test case.
///
/// # Environment Variables
/// - `CONCEPT_CONFIG_PATH`: configuration document (default: "config/rconfig.json")
/// - `CONCEPT_STORAGE_DIR`: test patient storage directory (default: "concept_data")
/// - `CONCEPT_STORAGE_KEY`: test patient storage key (default: "testPatients")
///
/// # Errors
/// Returns an error if the configuration is invalid or the document cannot be read or parsed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("concepts=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = path_from_env_value(std::env::var("CONCEPT_CONFIG_PATH").ok(), DEFAULT_CONFIG_PATH);
    let storage_dir = path_from_env_value(std::env::var("CONCEPT_STORAGE_DIR").ok(), DEFAULT_STORAGE_DIR);
    let storage_key = storage_key_from_env_value(std::env::var("CONCEPT_STORAGE_KEY").ok())?;

    let cfg = Arc::new(EngineConfig::new(
        config_path,
        storage_dir,
        storage_key,
        FieldConventions::default(),
    )?);

    tracing::info!("++ Loading concept configuration from {}", cfg.config_path().display());

    let store = Arc::new(ConceptStateStore::new());
    store.add_listener(|event| {
        if event.is_clear_all() {
            tracing::debug!("all concepts cleared");
        } else {
            tracing::debug!(concept = %event.name, state = ?event.state, "concept changed");
        }
        Ok(())
    });

    let mut manager = ConceptManager::new(cfg.clone(), store);
    manager.set_refresh_hook(|| tracing::debug!("refresh requested"));
    manager.load_configuration().await?;

    let storage = Arc::new(FileKeyValueStore::new(cfg.storage_dir()));
    let mut harness = TestPatientManager::new(storage, cfg.storage_key());
    harness.load();

    let sites = manager.concept_expressions();
    let patients: Vec<serde_json::Value> = harness
        .test_patients()
        .iter()
        .map(|patient| {
            let cases: Vec<serde_json::Value> = patient
                .test_cases
                .iter()
                .map(|case| {
                    serde_json::json!({
                        "id": case.id,
                        "name": case.name,
                        "results": harness.evaluate_all_sites(&patient.id, Some(&case.id), sites),
                    })
                })
                .collect();

            serde_json::json!({
                "id": patient.id,
                "name": patient.name,
                "results": harness.evaluate_all_sites(&patient.id, None, sites),
                "testCases": cases,
            })
        })
        .collect();

    let report = serde_json::json!({
        "distinctConcepts": manager.distinct_concepts(),
        "defaults": manager.evaluate_all_sites(),
        "testPatients": patients,
    });

    tracing::info!(
        concepts = manager.distinct_concepts().len(),
        sites = sites.len(),
        patients = harness.test_patients().len(),
        "-- Concept engine ready"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
