//! atomctl CLI entrypoint.
//!
//! This is the main entrypoint for the atomctl command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use atom_addons::addons::{simulated_gateway, AddonCatalog, AddonRequest};
use atom_addons::cli::{list_filter, Cli, Commands, IdentityArgs, LogFormat, OutputFormatter};
use atom_addons::config::{
    ConfigParser, ConfigValidator, GatewayBackend, RegistryBackend, ServiceConfig, DEFAULT_CONFIG_FILES,
};
use atom_addons::error::{AddonError, ConfigError, Result};
use atom_addons::gateway::{KubeGateway, ResourceGateway};
use atom_addons::provisioner::AddonProvisioner;
use atom_addons::registry::{
    AddonRegistry, AddonType, InstanceStatus, LocalAddonRegistry, MemoryAddonRegistry, S3AddonRegistry,
};
use atom_addons::saga::RunBounds;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", formatter.format_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force, formatter),
        Commands::Validate { request, warnings } => {
            cmd_validate(config_path, request.as_deref(), warnings, formatter)
        }
        Commands::Plan { request } => cmd_plan(config_path, &request, formatter),
        Commands::Provision { request, timeout } => {
            cmd_provision(config_path, &request, timeout, formatter).await
        }
        Commands::Deprovision { identity, timeout } => {
            cmd_deprovision(config_path, &identity, timeout, formatter).await
        }
        Commands::Get { identity } => cmd_get(config_path, &identity, formatter).await,
        Commands::List {
            namespace,
            cluster,
            addon_type,
            exclude_type,
        } => {
            cmd_list(config_path, &namespace, cluster.as_deref(), addon_type, exclude_type, formatter).await
        }
        Commands::SetStatus { identity, status } => {
            cmd_set_status(config_path, &identity, status, formatter).await
        }
    }
}

/// Writes a default configuration file.
fn cmd_init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<()> {
    info!("Initializing configuration in: {}", path.display());

    let config_path = path.join(DEFAULT_CONFIG_FILES[0]);
    let env_path = path.join(".env.example");

    if !force && config_path.exists() {
        warn!("Configuration file already exists: {}", config_path.display());
        return emit(&formatter.format_message("Configuration already present; use --force to overwrite"));
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let template = serde_yaml::to_string(&ServiceConfig::default()).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
        location: None,
    })?;
    std::fs::write(&config_path, template)?;
    info!("Created: {}", config_path.display());

    let env_template = "\
# Overrides applied after the configuration file
# ATOM_ADDONS_CLUSTER_ID=dev
# ATOM_ADDONS_PUBLIC_IP=10.0.0.10
# ATOM_ADDONS_GATEWAY_BACKEND=kube
# ATOM_ADDONS_REGISTRY_BACKEND=local
# ATOM_ADDONS_REGISTRY_PATH=~/.atom-addons/registry
# ATOM_ADDONS_REGISTRY_BUCKET=
";
    std::fs::write(&env_path, env_template)?;
    info!("Created: {}", env_path.display());

    emit(&formatter.format_message(&format!("Initialized {}", config_path.display())))
}

/// Validates the configuration and an optional request.
fn cmd_validate(
    config_path: Option<&Path>,
    request: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;

    let result = ConfigValidator::new().check(&config);
    if show_warnings {
        for warning in &result.warnings {
            warn!("{warning}");
        }
    }
    if let Some(error) = result.errors.first() {
        return Err(ConfigError::ValidationError {
            message: error.message.clone(),
            field: Some(error.field.clone()),
        }
        .into());
    }

    if let Some(path) = request {
        let request = read_request(path)?;
        let catalog = AddonCatalog::from_config(&config);
        let definition = catalog.resolve(&request)?;
        definition.plan()?;
        info!("Request {} is valid: {}", path.display(), definition.identity());
    }

    emit(&formatter.format_message(&format!(
        "Configuration is valid ({} warning(s))",
        result.warning_count()
    )))
}

/// Shows the steps a request would run.
fn cmd_plan(config_path: Option<&Path>, request: &Path, formatter: &OutputFormatter) -> Result<()> {
    let config = load_config(config_path)?;
    let request = read_request(request)?;
    let catalog = AddonCatalog::from_config(&config);

    let definition = catalog.resolve(&request)?;
    let steps: Vec<_> = definition.plan()?.iter().map(|step| step.describe()).collect();
    emit(&formatter.format_plan(&steps))
}

/// Provisions an add-on.
async fn cmd_provision(
    config_path: Option<&Path>,
    request: &Path,
    timeout: Option<u64>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let request = read_request(request)?;
    let engine = build_provisioner(&config).await?;
    let bounds = bounds(timeout);

    let summary = engine.provision(&request, &bounds).await?;
    emit(&formatter.format_summary(&summary))
}

/// Tears down an add-on.
async fn cmd_deprovision(
    config_path: Option<&Path>,
    identity: &IdentityArgs,
    timeout: Option<u64>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_provisioner(&config).await?;
    let bounds = bounds(timeout);

    let report = engine
        .deprovision(&identity.identity(&config.cluster.id), &bounds)
        .await?;
    emit(&formatter.format_teardown(&report))
}

/// Shows one recorded instance.
async fn cmd_get(config_path: Option<&Path>, identity: &IdentityArgs, formatter: &OutputFormatter) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_provisioner(&config).await?;

    let instance = engine.get(&identity.identity(&config.cluster.id)).await?;
    emit(&formatter.format_instance(&instance))
}

/// Lists recorded instances.
async fn cmd_list(
    config_path: Option<&Path>,
    namespace: &str,
    cluster: Option<&str>,
    addon_type: Option<AddonType>,
    exclude_type: Option<AddonType>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_provisioner(&config).await?;
    let filter = list_filter(namespace, cluster, &config.cluster.id);

    let instances = match (addon_type, exclude_type) {
        (_, Some(excluded)) => engine.list_excluding_type(&filter, excluded).await?,
        (Some(addon_type), None) => engine.list(&filter.with_type(addon_type)).await?,
        (None, None) => engine.list(&filter).await?,
    };
    emit(&formatter.format_instances(&instances))
}

/// Changes the status of a recorded instance.
async fn cmd_set_status(
    config_path: Option<&Path>,
    identity: &IdentityArgs,
    status: InstanceStatus,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_provisioner(&config).await?;

    let instance = engine
        .set_status(&identity.identity(&config.cluster.id), status)
        .await?;
    emit(&formatter.format_instance(&instance))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads `.env`, the configuration file and environment overrides, then
/// validates the result.
fn load_config(config_path: Option<&Path>) -> Result<ServiceConfig> {
    let base = config_path
        .and_then(Path::parent)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;

    let config = parser.load(config_path)?;
    let validation = ConfigValidator::new().validate(&config)?;
    for warning in &validation.warnings {
        debug!("Configuration warning: {warning}");
    }
    Ok(config)
}

/// Reads a request file.
fn read_request(path: &Path) -> Result<AddonRequest> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AddonError::from(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            })
        } else {
            AddonError::Io(e)
        }
    })?;
    Ok(AddonRequest::from_yaml(&content)?)
}

/// Bounds a run by the optional timeout and cancels it on Ctrl-C.
///
/// Compensation still runs to completion after cancellation.
fn bounds(timeout: Option<u64>) -> RunBounds {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; rolling back");
            on_signal.cancel();
        }
    });

    timeout
        .map_or_else(RunBounds::unbounded, |secs| RunBounds::with_timeout(Duration::from_secs(secs)))
        .with_cancel(cancel)
}

/// Builds the gateway, registry and provisioner the configuration names.
async fn build_provisioner(config: &ServiceConfig) -> Result<AddonProvisioner> {
    let gateway: Arc<dyn ResourceGateway> = match config.gateway.backend {
        GatewayBackend::Kube => Arc::new(KubeGateway::connect(config.cluster.kubeconfig.as_deref()).await?),
        GatewayBackend::Simulated => {
            warn!("Using the simulated gateway; nothing reaches a cluster");
            Arc::new(simulated_gateway())
        }
    };

    let registry: Arc<dyn AddonRegistry> = match config.registry.backend {
        RegistryBackend::Local => match &config.registry.path {
            Some(path) => Arc::new(LocalAddonRegistry::with_base_dir(path)),
            None => Arc::new(LocalAddonRegistry::new()?),
        },
        RegistryBackend::S3 => {
            let bucket = config
                .registry
                .bucket
                .as_deref()
                .ok_or_else(|| AddonError::internal("S3 bucket not configured"))?;
            Arc::new(
                S3AddonRegistry::new(bucket, config.registry.prefix.as_deref(), config.registry.region.as_deref())
                    .await,
            )
        }
        RegistryBackend::Memory => Arc::new(MemoryAddonRegistry::new()),
    };

    debug!(
        "Gateway: {}, registry: {}",
        gateway.backend_type(),
        registry.backend_type()
    );
    Ok(AddonProvisioner::new(gateway, registry, AddonCatalog::from_config(config)))
}
