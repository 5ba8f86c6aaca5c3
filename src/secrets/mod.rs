//! Pluggable secrets subsystem.
//!
//! Secrets are identified by a [`SecretUri`] and carry an append-only list of
//! revisions. Metadata lives in the [`MetadataStore`] catalog; revision content
//! lives in a backend [`ContentStore`] chosen per model by [`ProviderKind`].
//!
//! # Architecture
//!
//! - [`SecretsService`]: per-model facade for create/read/update/delete,
//!   access grants and agent credential minting
//! - [`MetadataStore`]: catalog over a [`DocumentStore`](crate::storage::DocumentStore)
//! - [`SecretBackendProvider`]: backend lifecycle and scoped credentials,
//!   registered in a [`ProviderRegistry`]
//! - [`ContentStore`]: revision content, addressed by [`SecretUri::name`]
//!
//! # Example
//!
//! ```rust,ignore
//! use strongroom::secrets::{CreateParams, RequestContext, SecretUri, SecretValue, SecretsService};
//!
//! let service = SecretsService::for_model(registry, store, model);
//! let ctx = RequestContext::new();
//! let uri = SecretUri::generate();
//! let owner = "application-mysql".parse()?;
//!
//! service.create_secret(&ctx, &uri, &CreateParams::new(owner, SecretValue::new([("password", "s3cret")]))).await?;
//! let value = service.get_secret_value(&ctx, &uri, None).await?;
//! ```

pub mod content;
pub mod context;
pub mod error;
pub mod metadata;
pub mod metadata_store;
pub mod params;
pub mod provider;
pub mod retry;
pub mod service;
pub mod tag;
pub mod types;
pub mod uri;
pub mod value;

pub use content::{ContentStore, StagedContent};
pub use context::{CallKind, RequestContext, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ErrorKind, MutationOutcome, Result, SecretsError};
pub use metadata::{RotatePolicy, SecretMetadata, SecretParams, SecretRevision, SecretRevisions, SecretScope};
pub use metadata_store::{MetadataStore, NewRevision, SecretFilter};
pub use params::{CreateParams, DefaultsParams, ParamKind, ParamsValidator, PassthroughParams, UpdateParams};
pub use provider::{
    InternalProvider, ModelInfo, ProviderKind, ProviderRegistry, SecretBackendProvider, StoreConfig,
    VaultConnection, VaultProvider,
};
pub use retry::RetryPolicy;
pub use service::SecretsService;
pub use tag::{EntityTag, TagKind};
pub use types::SecretString;
pub use uri::SecretUri;
pub use value::SecretValue;
