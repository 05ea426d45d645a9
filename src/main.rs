/// Version injected at compile time via RESCACHE_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("RESCACHE_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rescache::config::Config;
use rescache::transport::format_transport_error;
use rescache::{Error, HttpTransport, Operation, Registry};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Lazy-fetching cache client for JSON APIs
#[derive(Parser, Debug)]
#[command(name = "rescache", version = VERSION, about, long_about = None)]
struct Args {
    /// Config file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API root, overriding the config file
    #[arg(long)]
    base_url: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[arg(short, long, value_enum, default_value = "json")]
    output: Output,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the effective settings to the config file
    Init,
    /// List configured resource types
    Types,
    /// Fetch resources matching a filter
    List {
        #[arg(required = true)]
        resource_types: Vec<String>,
        /// JSON filter object
        #[arg(long)]
        filter: Option<String>,
    },
    /// Fetch one resource
    Get { resource_type: String, id: String },
    /// Create a resource from a JSON object
    Create { resource_type: String, attributes: String },
    /// Update a resource with a JSON object
    Update {
        resource_type: String,
        id: String,
        attributes: String,
    },
    /// Destroy a resource
    Destroy {
        resource_type: String,
        id: String,
        #[arg(long)]
        pid: Option<String>,
    },
    /// Run a custom action
    Action {
        resource_type: String,
        name: String,
        #[arg(long)]
        id: Option<String>,
        /// JSON arguments
        #[arg(long = "args")]
        arguments: Option<String>,
        #[arg(long)]
        pid: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    Json,
    Yaml,
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG narrows per-module levels when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("rescache {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("rescache").join("rescache.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".rescache").join("rescache.log");
    }
    PathBuf::from("rescache.log")
}

fn parse_json(label: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON", label))
}

/// User-facing message for a cache error
fn describe(error: &Error) -> String {
    match error {
        Error::Transport(inner) => format_transport_error(inner),
        other => other.to_string(),
    }
}

fn print(output: Output, value: &Value) -> Result<()> {
    let rendered = match output {
        Output::Json => serde_json::to_string_pretty(value)?,
        Output::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn init(mut config: Config, path: Option<PathBuf>, base_url: Option<String>) -> Result<()> {
    let Some(path) = path.or_else(Config::config_path) else {
        bail!("No config directory found. Use --config to choose a file");
    };
    if base_url.is_some() {
        config.base_url = base_url;
    }
    config.save_to(&path)?;
    tracing::info!("Wrote config to {:?}", path);
    println!("{}", path.display());
    Ok(())
}

async fn list(registry: &Registry, resource_types: &[String], filter: &Value) -> Result<Value> {
    let loads = resource_types.iter().map(|resource_type| async move {
        let handle = registry.resource(resource_type)?;
        let resources = handle.load_many(filter).await?;
        let values: Vec<Value> = resources.iter().map(|r| r.to_value()).collect();
        Ok::<_, Error>((resource_type.clone(), Value::Array(values)))
    });

    let mut listed = Map::new();
    for result in futures::future::join_all(loads).await {
        let (resource_type, values) = result.map_err(|e| anyhow::anyhow!(describe(&e)))?;
        listed.insert(resource_type, values);
    }

    if resource_types.len() == 1 {
        return Ok(listed
            .into_iter()
            .next()
            .map(|(_, values)| values)
            .unwrap_or(Value::Null));
    }
    Ok(Value::Object(listed))
}

async fn run(registry: &Registry, command: Command) -> Result<Value> {
    let completed = |result: rescache::Result<Value>| result.map_err(|e| anyhow::anyhow!(describe(&e)));

    match command {
        Command::Init => bail!("init does not need a registry"),
        Command::Types => Ok(json!(registry.resource_types())),
        Command::List {
            resource_types,
            filter,
        } => {
            let filter = match filter {
                Some(raw) => parse_json("--filter", &raw)?,
                None => json!({}),
            };
            list(registry, &resource_types, &filter).await
        }
        Command::Get { resource_type, id } => {
            let handle = registry.resource(&resource_type)?;
            match handle.load_one(&id).await {
                Ok(Some(resource)) => Ok(resource.to_value()),
                Ok(None) => bail!("{} {} could not be loaded", resource_type, id),
                Err(e) => bail!(describe(&e)),
            }
        }
        Command::Create {
            resource_type,
            attributes,
        } => {
            let operation = Operation::create(&resource_type, parse_json("attributes", &attributes)?);
            completed(registry.resource(&resource_type)?.run(operation).await)
        }
        Command::Update {
            resource_type,
            id,
            attributes,
        } => {
            let mut resource = parse_json("attributes", &attributes)?;
            let Some(fields) = resource.as_object_mut() else {
                bail!("attributes must be a JSON object");
            };
            fields.insert("id".to_string(), Value::String(id));
            let operation = Operation::update(&resource_type, resource);
            completed(registry.resource(&resource_type)?.run(operation).await)
        }
        Command::Destroy {
            resource_type,
            id,
            pid,
        } => {
            let mut operation = Operation::destroy(&resource_type, &id);
            if let Some(pid) = pid {
                operation = operation.with_pid(&pid);
            }
            completed(registry.resource(&resource_type)?.run(operation).await)
        }
        Command::Action {
            resource_type,
            name,
            id,
            arguments,
            pid,
        } => {
            let arguments = match arguments {
                Some(raw) => parse_json("--args", &raw)?,
                None => json!({}),
            };
            let mut operation = Operation::action(&resource_type, &name, id.as_deref(), arguments);
            if let Some(pid) = pid {
                operation = operation.with_pid(&pid);
            }
            completed(registry.resource(&resource_type)?.run(operation).await)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let config = match &args.config {
        Some(path) if path.exists() || !matches!(args.command, Command::Init) => {
            Config::from_path(path)?
        }
        Some(_) => Config::default(),
        None => Config::load(),
    };

    if let Command::Init = args.command {
        return init(config, args.config, args.base_url);
    }

    let Some(base_url) = args.base_url.clone().or_else(|| config.base_url.clone()) else {
        bail!("No API configured. Set base_url in the config file or use --base-url");
    };
    tracing::info!("Using API at {}", base_url);

    let mut transport = HttpTransport::new(&base_url)?;
    if let Some(token) = &config.token {
        transport = transport.with_token(token);
    }

    let registry = Registry::builder(Arc::new(transport))
        .resources(config.resources.clone())
        .settings(config.settings())
        .build()?;

    let value = run(&registry, args.command).await?;
    print(args.output, &value)
}
