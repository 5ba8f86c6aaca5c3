//! # Command Line Interface
//!
//! Administrative commands for model secret backends: provisioning, teardown,
//! credential minting and configuration checks.

pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::config::{self, AppConfig};
use crate::errors::{Result, StrongroomError};
use crate::observability::{init_observability, log_config_info};
use crate::secrets::provider::vault::{VaultBackendConfig, VaultrsConnector};
use crate::secrets::{
    EntityTag, InternalProvider, ModelInfo, ProviderKind, ProviderRegistry, RequestContext, SecretsService,
    VaultProvider,
};
use crate::storage::{open_store, DocumentStore};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "strongroom")]
#[command(about = "Strongroom secret backend tooling")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a model's namespace on its secret backend
    InitModel {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Remove everything a model's secret backend holds
    CleanupModel {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Mint a content store config, scoped to an agent when --tag is given
    Mint {
        #[command(flatten)]
        model: ModelArgs,

        /// Agent entity tag, e.g. unit-mysql-0 or application-mysql
        #[arg(long)]
        tag: Option<String>,

        /// Output format: json or yaml
        #[arg(short, long, default_value = "json")]
        output: String,
    },

    /// Validate configuration and an optional backend config file
    CheckConfig {
        /// Vault backend config to validate (JSON or YAML)
        #[arg(long)]
        backend_config: Option<PathBuf>,

        /// Output format: json or yaml
        #[arg(short, long, default_value = "json")]
        output: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model uuid
    #[arg(long)]
    pub model_uuid: Uuid,

    /// Controller uuid
    #[arg(long)]
    pub controller_uuid: Uuid,

    /// Model name
    #[arg(long, default_value = "default")]
    pub model_name: String,

    /// Secret backend: internal or vault
    #[arg(long, default_value = "internal")]
    pub backend: String,

    /// Administrative backend config file (JSON or YAML)
    #[arg(long)]
    pub backend_config: Option<PathBuf>,
}

impl ModelArgs {
    fn model_info(&self) -> Result<ModelInfo> {
        let backend: ProviderKind = self.backend.parse()?;
        let backend_config = self.backend_config.as_deref().map(read_file).transpose()?;
        if backend == ProviderKind::Vault && backend_config.is_none() {
            return Err(StrongroomError::validation_field(
                "vault backend requires --backend-config",
                "backend_config",
            ));
        }
        Ok(ModelInfo::new(self.model_uuid, self.controller_uuid, self.model_name.clone())
            .with_backend(backend, backend_config))
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| StrongroomError::io(e, format!("reading {}", path.display())))
}

/// Every provider this binary knows, configured from `config`
pub fn build_registry(config: &AppConfig, store: Arc<dyn DocumentStore>) -> ProviderRegistry {
    let vault = VaultProvider::new(Arc::new(VaultrsConnector::new(config.secrets.request_timeout())))
        .with_token_ttl(config.secrets.token_ttl())
        .with_retry_policy(config.secrets.retry_policy());

    ProviderRegistry::new().with_provider(Arc::new(InternalProvider::new(store))).with_provider(Arc::new(vault))
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut app_config = config::load(cli.config.as_deref())?;
    if cli.verbose {
        app_config.observability.log_level = "debug".to_string();
    }
    init_observability(&app_config.observability).await?;
    log_config_info(&app_config);

    match cli.command {
        Commands::InitModel { model } => {
            let service = open_service(&app_config, &model).await?;
            service.initialise_model(&request_context(&app_config)).await?;
            info!(model_uuid = %model.model_uuid, backend = %model.backend, "Model secret backend initialised");
        }
        Commands::CleanupModel { model } => {
            let service = open_service(&app_config, &model).await?;
            service.cleanup_model(&request_context(&app_config)).await?;
            info!(model_uuid = %model.model_uuid, backend = %model.backend, "Model secret backend cleaned up");
        }
        Commands::Mint { model, tag, output } => {
            let format: OutputFormat = output.parse()?;
            let service = open_service(&app_config, &model).await?;
            let ctx = request_context(&app_config);
            let tag: Option<EntityTag> =
                tag.map(|t| t.parse::<EntityTag>()).transpose().map_err(StrongroomError::from)?;
            let span = crate::secret_span!("mint", model_uuid = %model.model_uuid);
            let store_config = async {
                match &tag {
                    Some(tag) => service.agent_store_config(&ctx, tag).await,
                    None => service.admin_store_config(&ctx).await,
                }
            }
            .instrument(span)
            .await?;
            output::print_output(&store_config.to_params(), format)?;
        }
        Commands::CheckConfig { backend_config, output } => {
            let format: OutputFormat = output.parse()?;
            if let Some(path) = backend_config {
                let raw = read_file(&path)?;
                VaultBackendConfig::parse(&raw)
                    .map_err(StrongroomError::from)
                    .with_context(|| format!("invalid backend config {}", path.display()))?;
                info!(path = %path.display(), "Backend config is valid");
            }
            output::print_output(&app_config, format)?;
        }
    }

    Ok(())
}

fn request_context(config: &AppConfig) -> RequestContext {
    RequestContext::with_timeout(config.secrets.request_timeout())
}

async fn open_service(config: &AppConfig, model: &ModelArgs) -> Result<SecretsService> {
    let store = open_store(&config.storage).await?;
    let registry = build_registry(config, store.clone());
    Ok(SecretsService::for_model(Arc::new(registry), store, model.model_info()?)
        .with_retry_policy(config.secrets.retry_policy()))
}
