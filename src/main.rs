use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fhir::{Bundle, DiagnosticReport, Resource, ResourceId};
use omrs_core::model::{Concept, Patient, Provider, Visit};
use omrs_core::{BridgeConfig, HandlerRegistry, HttpReportSource, InMemoryStore, RequestContext};

const DEFAULT_STORE: &str = "omrs-store.json";

#[derive(Parser)]
#[command(name = "omrs-fhir")]
#[command(about = "OpenMRS ⇄ FHIR DiagnosticReport bridge")]
struct Cli {
    /// Store snapshot file (default: $OMRS_FHIR_STORE or ./omrs-store.json)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Bridge configuration YAML (default: $OMRS_FHIR_CONFIG, else built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// User recorded in audit fields
    #[arg(long, global = true, default_value = "admin")]
    user: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a store snapshot seeded with the configured concepts and encounter metadata
    Init {
        /// Overwrite an existing snapshot
        #[arg(long)]
        force: bool,
    },
    /// Register a patient
    AddPatient { given_name: String, family_name: String },
    /// Register a provider that reports can name as performer
    AddProvider { name: String },
    /// Open a visit for a patient
    AddVisit {
        /// Patient UUID or Patient/<uuid>
        patient: String,
    },
    /// Add a concept to the dictionary
    AddConcept { code: String, name: String },
    /// Save a DiagnosticReport read from a JSON file ("-" for stdin)
    Save { file: PathBuf },
    /// Print a DiagnosticReport
    Get { id: String },
    /// Replace the contents of a DiagnosticReport
    Update { id: String, file: PathBuf },
    /// Retire a DiagnosticReport
    Retire { id: String },
    /// Pull reports for a patient given name from the federation server and store them
    Pull {
        given_name: String,
        /// Service category code
        #[arg(long, default_value = "MB")]
        category: String,
    },
}

/// Entry point for the `omrs-fhir` CLI.
///
/// Each invocation loads the store snapshot, runs one operation and writes the snapshot back
/// when the operation changed it.
///
/// # Environment Variables
/// - `OMRS_FHIR_STORE`: store snapshot path
/// - `OMRS_FHIR_CONFIG`: bridge configuration YAML path
/// - `RUST_LOG`: log filter (default: `omrs_core=info`)
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("omrs_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match cli.config.clone().or_else(|| env_path("OMRS_FHIR_CONFIG")) {
        Some(path) => BridgeConfig::load(&path)?,
        None => BridgeConfig::default(),
    };
    let store_path = cli
        .store
        .clone()
        .or_else(|| env_path("OMRS_FHIR_STORE"))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE));
    tracing::debug!("using store snapshot {}", store_path.display());

    if let Commands::Init { force } = cli.command {
        if store_path.exists() && !force {
            bail!(
                "{} already exists; pass --force to overwrite",
                store_path.display()
            );
        }
        InMemoryStore::seeded(&config).write_snapshot(&store_path)?;
        println!("Initialised store at {}", store_path.display());
        return Ok(());
    }

    let mut store = InMemoryStore::load_snapshot(&store_path)
        .with_context(|| format!("run 'omrs-fhir init' to create {}", store_path.display()))?;
    let remote = config
        .radiology_server_url
        .as_deref()
        .map(HttpReportSource::new)
        .transpose()?;
    if let Some(remote) = &remote {
        tracing::debug!("federation server {}", remote.base_url());
    }

    let changed = run(cli.command, &cli.user, &mut store, &config, remote.as_ref())?;
    if changed {
        store.write_snapshot(&store_path)?;
    }
    Ok(())
}

/// Run one command. Returns whether the store changed.
fn run(
    command: Commands,
    user: &str,
    store: &mut InMemoryStore,
    config: &BridgeConfig,
    remote: Option<&HttpReportSource>,
) -> anyhow::Result<bool> {
    match command {
        Commands::Init { .. } => Ok(false),
        Commands::AddPatient {
            given_name,
            family_name,
        } => {
            let patient = store.add_patient(Patient::new(given_name, family_name));
            println!("Added patient {} ({})", patient.uuid, patient.display_name());
            Ok(true)
        }
        Commands::AddProvider { name } => {
            let provider = store.add_provider(Provider::new(name));
            println!("Added provider {} ({})", provider.uuid, provider.name);
            Ok(true)
        }
        Commands::AddVisit { patient } => {
            let patient = ResourceId::parse_id_or_reference(&patient, "Patient")?;
            if !store.patients().iter().any(|p| p.uuid == patient) {
                bail!("Patient '{patient}' not found");
            }
            let visit = store.add_visit(Visit::new(patient, chrono::Utc::now()));
            println!("Opened visit {} for patient {patient}", visit.uuid);
            Ok(true)
        }
        Commands::AddConcept { code, name } => {
            let concept = store.add_concept(Concept::new(code, name));
            println!("Added concept {} ({})", concept.code, concept.uuid);
            Ok(true)
        }
        command => {
            let registry = HandlerRegistry::default();
            let mut ctx = RequestContext::new(store, config, user);
            if let Some(remote) = remote {
                ctx = ctx.with_remote(remote);
            }
            match command {
                Commands::Save { file } => {
                    let saved = registry.save(&mut ctx, read_report(&file)?)?;
                    print_resource(Resource::from(saved))?;
                    Ok(true)
                }
                Commands::Get { id } => {
                    print_resource(Resource::from(registry.get_by_id(&ctx, &id)?))?;
                    Ok(false)
                }
                Commands::Update { id, file } => {
                    let updated = registry.update(&mut ctx, &id, read_report(&file)?)?;
                    print_resource(Resource::from(updated))?;
                    Ok(true)
                }
                Commands::Retire { id } => {
                    registry.retire(&mut ctx, &id)?;
                    println!("Retired DiagnosticReport {id}");
                    Ok(true)
                }
                Commands::Pull {
                    given_name,
                    category,
                } => {
                    let pulled = registry.get_by_subject_name(&mut ctx, &category, &given_name)?;
                    let changed = !pulled.is_empty();
                    let bundle = Bundle::searchset(pulled.into_iter().map(Resource::from).collect());
                    print_resource(Resource::Bundle(Box::new(bundle)))?;
                    Ok(changed)
                }
                Commands::Init { .. }
                | Commands::AddPatient { .. }
                | Commands::AddProvider { .. }
                | Commands::AddVisit { .. }
                | Commands::AddConcept { .. } => Ok(false),
            }
        }
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn read_report(path: &Path) -> anyhow::Result<DiagnosticReport> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    Ok(Resource::parse_json(&text)?.into_diagnostic_report()?)
}

fn print_resource(resource: Resource) -> anyhow::Result<()> {
    println!("{}", resource.render_json()?);
    Ok(())
}
