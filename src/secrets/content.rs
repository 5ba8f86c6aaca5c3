//! Content store abstraction.
//!
//! A content store holds the bytes of individual revisions. It knows nothing
//! about metadata; callers resolve a revision's address from the catalog and
//! hand it to [`ContentStore::get_content`].

use async_trait::async_trait;

use super::context::RequestContext;
use super::error::Result;
use super::provider::ProviderKind;
use super::uri::SecretUri;
use super::value::SecretValue;
use crate::storage::TxnOp;

#[async_trait]
pub trait ContentStore: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Read the content at `address`. Missing content is `NotFound`.
    async fn get_content(&self, ctx: &RequestContext, address: &str) -> Result<SecretValue>;

    /// Write the content of one revision, returning its address.
    async fn save_content(
        &self,
        ctx: &RequestContext,
        uri: &SecretUri,
        revision: u32,
        value: &SecretValue,
    ) -> Result<String>;

    /// Delete the content at `address`. Absent content is not an error.
    async fn delete_content(&self, ctx: &RequestContext, address: &str) -> Result<()>;

    /// Transactional staging, for stores that share the metadata document store.
    fn staging(&self) -> Option<&dyn StagedContent> {
        None
    }
}

/// Content writes expressed as document store operations.
///
/// Lets the caller commit content in the same transaction as the metadata
/// it belongs to.
pub trait StagedContent: Send + Sync {
    /// Operations that write one revision, and the address they write to.
    fn save_ops(&self, uri: &SecretUri, revision: u32, value: &SecretValue) -> Result<(String, Vec<TxnOp>)>;

    /// Operations that remove the content at `address`.
    fn delete_ops(&self, address: &str) -> Vec<TxnOp>;
}
