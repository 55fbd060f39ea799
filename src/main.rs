use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use birdkb::api::{self, AppState};
use birdkb::config::AppConfig;
use birdkb::inference::InferenceAdapter;
use birdkb::models::{FeatureValue, ValueKind};
use birdkb::render;
use birdkb::store::KnowledgeBase;

#[derive(Parser)]
#[command(name = "bkb")]
#[command(about = "Bird species knowledge base and classifier")]
struct Cli {
    /// Directory holding the knowledge-base tables
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API for the interactive front-end
    Serve {
        /// Port for HTTP API
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage the species taxonomy
    #[command(subcommand)]
    Species(SpeciesCommand),
    /// Manage the feature registry
    #[command(subcommand)]
    Feature(FeatureCommand),
    /// Manage feature value settings
    #[command(subcommand)]
    Setting(SettingCommand),
    /// Which features apply to a species
    #[command(subcommand)]
    Applicability(ApplicabilityCommand),
    /// Feature values of a species
    #[command(subcommand)]
    Values(ValuesCommand),
    /// Show everything recorded about a species
    Profile { species: String },
    /// Predict a species from CODE=VALUE pairs
    Classify { inputs: Vec<String> },
    /// Drop table columns and rows left behind by removed features and species
    Prune,
    /// List stored values outside their feature's current domain
    Audit,
}

#[derive(Subcommand)]
enum SpeciesCommand {
    List,
    Add { name: String },
    /// Remove by position as shown by `list`
    Remove { index: usize },
}

#[derive(Subcommand)]
enum FeatureCommand {
    List,
    Add { label: String },
    Remove { label: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Numeric,
    Enumerable,
}

impl From<KindArg> for ValueKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Numeric => ValueKind::Numeric,
            KindArg::Enumerable => ValueKind::Enumerable,
        }
    }
}

#[derive(Subcommand)]
enum SettingCommand {
    Show { code: String },
    Kind { code: String, kind: KindArg },
    Range { code: String, min: i64, max: i64 },
    AddValue { code: String, value: String },
    RemoveValue { code: String, index: usize },
}

#[derive(Subcommand)]
enum ApplicabilityCommand {
    Show { species: String },
    /// Set flags as CODE=true|false pairs
    Set { species: String, flags: Vec<String> },
}

#[derive(Subcommand)]
enum ValuesCommand {
    Show { species: String },
    /// Set values as CODE=VALUE pairs
    Set { species: String, values: Vec<String> },
}

/// Initialize tracing with output to stderr so command output stays clean
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "birdkb=info,tower_http=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn split_pair(pair: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = pair
        .split_once('=')
        .with_context(|| format!("Expected CODE=VALUE, got '{}'", pair))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn parse_flags(pairs: &[String]) -> anyhow::Result<BTreeMap<String, bool>> {
    pairs
        .iter()
        .map(|pair| {
            let (code, raw) = split_pair(pair)?;
            let flag = match raw.as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                other => bail!("Expected true or false for {}, got '{}'", code, other),
            };
            Ok((code, flag))
        })
        .collect()
}

fn parse_values(pairs: &[String]) -> anyhow::Result<BTreeMap<String, FeatureValue>> {
    pairs
        .iter()
        .map(|pair| {
            let (code, raw) = split_pair(pair)?;
            let value = FeatureValue::parse_cell(&raw).unwrap_or(FeatureValue::Label(raw));
            Ok((code, value))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_inference(config: &AppConfig, data_dir: &std::path::Path) -> Option<InferenceAdapter> {
    let model = config.model_path(data_dir);
    let encoder = config.label_encoder_path(data_dir);
    match InferenceAdapter::load(&model, &encoder) {
        Ok(adapter) => Some(adapter),
        Err(e) => {
            tracing::warn!("Classifier unavailable ({}): {}", model.display(), e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::load();
    let data_dir = config.resolve_data_dir(cli.data_dir.as_deref())?;
    let kb = if config.seed_default_features {
        KnowledgeBase::open_seeded(&data_dir)
    } else {
        KnowledgeBase::open(&data_dir)
    }
    .with_context(|| format!("Failed to open knowledge base in {}", data_dir.display()))?;

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);
            let inference = load_inference(&config, kb.data_dir());
            tracing::info!(data_dir = %kb.data_dir().display(), "serving knowledge base");

            let mut state = AppState::new(kb);
            if let Some(adapter) = inference {
                state = state.with_inference(adapter);
            }

            let app = api::create_router(state);
            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
            tracing::info!("birdkb listening on http://127.0.0.1:{}", port);

            axum::serve(listener, app).await?;
        }
        Commands::Species(cmd) => match cmd {
            SpeciesCommand::List => {
                for (i, name) in kb.list_species().iter().enumerate() {
                    println!("{:>3}. {}", i, name);
                }
            }
            SpeciesCommand::Add { name } => {
                if !kb.add_species(&name)? {
                    println!("'{}' is already listed", name);
                }
            }
            SpeciesCommand::Remove { index } => match kb.remove_species_at(index)? {
                Some(name) => println!("Removed '{}'", name),
                None => bail!("No species at position {}", index),
            },
        },
        Commands::Feature(cmd) => match cmd {
            FeatureCommand::List => print!("{}", render::render_domains(&kb.feature_domains())),
            FeatureCommand::Add { label } => match kb.add_feature(&label)? {
                Some(feature) => println!("Registered '{}' as {}", feature.label, feature.code),
                None => println!("'{}' is already registered", label),
            },
            FeatureCommand::Remove { label } => {
                if kb.remove_feature(&label)?.is_none() {
                    bail!("No feature labelled '{}'", label);
                }
            }
        },
        Commands::Setting(cmd) => match cmd {
            SettingCommand::Show { code } => print_json(&kb.get_setting(&code)?)?,
            SettingCommand::Kind { code, kind } => print_json(&kb.set_kind(&code, kind.into())?)?,
            SettingCommand::Range { code, min, max } => kb.set_range(&code, min, max)?,
            SettingCommand::AddValue { code, value } => {
                if !kb.add_enum_value(&code, &value)? {
                    println!("'{}' was not added (empty or already listed)", value);
                }
            }
            SettingCommand::RemoveValue { code, index } => {
                if kb.remove_enum_value(&code, index)?.is_none() {
                    bail!("No value at position {} for {}", index, code);
                }
            }
        },
        Commands::Applicability(cmd) => match cmd {
            ApplicabilityCommand::Show { species } => print_json(&kb.get_applicability(&species))?,
            ApplicabilityCommand::Set { species, flags } => {
                kb.set_applicability(&species, parse_flags(&flags)?)?
            }
        },
        Commands::Values(cmd) => match cmd {
            ValuesCommand::Show { species } => print_json(&kb.get_values(&species))?,
            ValuesCommand::Set { species, values } => {
                let values = parse_values(&values)?
                    .into_iter()
                    .map(|(code, value)| (code, Some(value)))
                    .collect();
                kb.set_values(&species, values)?;
            }
        },
        Commands::Profile { species } => {
            print!("{}", render::render_profile(&kb.species_profile(&species)?));
        }
        Commands::Classify { inputs } => {
            let inputs = parse_values(&inputs)?;
            let domains = kb.feature_domains();
            // Reject empty value lists before touching the model files.
            birdkb::inference::build_vector(&domains, &inputs)?;
            let adapter =
                load_inference(&config, &data_dir).ok_or(birdkb::Error::ModelUnavailable)?;
            println!("{}", adapter.classify(&domains, &inputs)?);
        }
        Commands::Prune => print_json(&kb.prune()?)?,
        Commands::Audit => print_json(&kb.domain_violations())?,
    }

    Ok(())
}
