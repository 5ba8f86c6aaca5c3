//! Secret catalog over a [`DocumentStore`].
//!
//! One [`MetadataStore`] serves one model. Every document carries the model
//! uuid; documents of other models are invisible through it.
//!
//! Secret ids are unique across models. Documents are keyed by the bare id and
//! tombstones are consulted regardless of model, so creating an id that is
//! live or deleted in any model fails with `AlreadyExists`. Generated ids make
//! such a collision a deliberate reuse rather than chance.
//!
//! Collections:
//! - `secrets`: one [`SecretMetadata`] per URI, keyed by secret id
//! - `secretRevisions`: one [`SecretRevision`] per revision, keyed by content address
//! - `secretPermissions`: read grants, keyed by `<id>#<subject>`
//! - `secretTombstones`: deleted URIs, never reused

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::error::{Result, SecretsError};
use super::metadata::{SecretMetadata, SecretParams, SecretRevision, SecretRevisions, SecretScope};
use super::params::{CreateParams, UpdateParams};
use super::provider::ProviderKind;
use super::tag::{EntityTag, TagKind};
use super::uri::SecretUri;
use crate::storage::{DocumentStore, Filter, StorageError, TxnOp};

pub const SECRETS_COLLECTION: &str = "secrets";
pub const REVISIONS_COLLECTION: &str = "secretRevisions";
pub const PERMISSIONS_COLLECTION: &str = "secretPermissions";
pub const TOMBSTONES_COLLECTION: &str = "secretTombstones";

#[derive(Debug, Serialize, Deserialize)]
struct SecretDoc {
    model_uuid: Uuid,
    #[serde(flatten)]
    metadata: SecretMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct RevisionDoc {
    model_uuid: Uuid,
    #[serde(flatten)]
    revision: SecretRevision,
}

#[derive(Debug, Serialize, Deserialize)]
struct PermissionDoc {
    model_uuid: Uuid,
    uri: SecretUri,
    subject: EntityTag,
}

#[derive(Debug, Serialize, Deserialize)]
struct TombstoneDoc {
    model_uuid: Uuid,
    uri: SecretUri,
    delete_time: DateTime<Utc>,
}

/// Selection for [`MetadataStore::list_secrets`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretFilter {
    pub owner_tag: Option<EntityTag>,
}

impl SecretFilter {
    pub fn owned_by(owner: EntityTag) -> Self {
        Self { owner_tag: Some(owner) }
    }
}

/// A revision appended by an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevision {
    /// Must be exactly one past the current latest revision.
    pub revision: u32,
    pub checksum: String,
}

fn permission_id(uri: &SecretUri, subject: &EntityTag) -> String {
    format!("{}#{}", uri.id(), subject)
}

fn secret_conflict(uri: &SecretUri) -> impl FnOnce(StorageError) -> SecretsError + '_ {
    move |e| match e {
        StorageError::AlreadyExists { .. } => SecretsError::already_exists("secret", uri.to_string()),
        other => other.into(),
    }
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    store: Arc<dyn DocumentStore>,
    model_uuid: Uuid,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn DocumentStore>, model_uuid: Uuid) -> Self {
        Self { store, model_uuid }
    }

    pub fn model_uuid(&self) -> Uuid {
        self.model_uuid
    }

    fn model_filter(&self) -> Filter {
        Filter::new().eq("model_uuid", self.model_uuid.to_string())
    }

    async fn secret_doc(&self, uri: &SecretUri) -> Result<Option<SecretDoc>> {
        let Some(body) = self.store.get(SECRETS_COLLECTION, uri.id()).await? else {
            return Ok(None);
        };
        let doc: SecretDoc = serde_json::from_value(body)?;
        Ok((doc.model_uuid == self.model_uuid).then_some(doc))
    }

    /// Record a new secret and its revision 0.
    ///
    /// `content_ops` are committed in the same transaction.
    #[instrument(skip(self, params, options, checksum, content_ops), fields(uri = %uri), name = "db_create_secret")]
    pub async fn create_secret(
        &self,
        uri: &SecretUri,
        provider: ProviderKind,
        params: &CreateParams,
        options: SecretParams,
        checksum: String,
        content_ops: Vec<TxnOp>,
    ) -> Result<(SecretMetadata, SecretRevision)> {
        let owner_tag = params
            .owner_tag
            .clone()
            .ok_or_else(|| SecretsError::validation_field("secret owner is required", "owner_tag"))?;

        if self.store.get(TOMBSTONES_COLLECTION, uri.id()).await?.is_some() {
            return Err(SecretsError::already_exists("secret", uri.to_string()));
        }

        let now = Utc::now();
        let rotate_policy = params.rotate_policy.unwrap_or_default();
        let metadata = SecretMetadata {
            uri: uri.clone(),
            scope: params.scope.unwrap_or_else(|| SecretScope::for_owner(&owner_tag)),
            owner_tag,
            provider_label: provider,
            version: 1,
            label: params.label.clone().filter(|l| !l.is_empty()),
            description: params.description.clone().filter(|d| !d.is_empty()),
            rotate_policy,
            next_rotate_time: params.next_rotate_time.or_else(|| rotate_policy.next_rotate_time(now)),
            expire_time: params.expire_time,
            params: options,
            latest_revision: 0,
            create_time: now,
            update_time: now,
        };
        let revision = SecretRevision {
            uri: uri.clone(),
            revision: 0,
            address: uri.name(0),
            checksum,
            create_time: now,
        };

        let mut ops = vec![
            TxnOp::insert(
                SECRETS_COLLECTION,
                uri.id(),
                serde_json::to_value(SecretDoc { model_uuid: self.model_uuid, metadata: metadata.clone() })?,
            ),
            TxnOp::insert(
                REVISIONS_COLLECTION,
                revision.address.clone(),
                serde_json::to_value(RevisionDoc { model_uuid: self.model_uuid, revision: revision.clone() })?,
            ),
        ];
        ops.extend(content_ops);
        self.store.run_transaction(ops).await.map_err(secret_conflict(uri))?;

        debug!(owner = %metadata.owner_tag, "Created secret metadata");
        Ok((metadata, revision))
    }

    #[instrument(skip(self), fields(uri = %uri), name = "db_get_secret")]
    pub async fn get_secret(&self, uri: &SecretUri) -> Result<SecretMetadata> {
        self.secret_doc(uri)
            .await?
            .map(|doc| doc.metadata)
            .ok_or_else(|| SecretsError::not_found("secret", uri.to_string()))
    }

    /// Whether this model deleted `uri`.
    #[instrument(skip(self), fields(uri = %uri), name = "db_is_tombstoned")]
    pub async fn is_tombstoned(&self, uri: &SecretUri) -> Result<bool> {
        let Some(body) = self.store.get(TOMBSTONES_COLLECTION, uri.id()).await? else {
            return Ok(false);
        };
        let doc: TombstoneDoc = serde_json::from_value(body)?;
        Ok(doc.model_uuid == self.model_uuid)
    }

    /// Apply a partial update, optionally appending a revision.
    ///
    /// `options` is the already merged option map. Two updates racing to
    /// append the same revision number fail the second with `AlreadyExists`.
    #[instrument(skip(self, params, options, new_revision, content_ops), fields(uri = %uri), name = "db_update_secret")]
    pub async fn update_secret(
        &self,
        uri: &SecretUri,
        params: &UpdateParams,
        options: Option<SecretParams>,
        new_revision: Option<NewRevision>,
        content_ops: Vec<TxnOp>,
    ) -> Result<(SecretMetadata, Option<SecretRevision>)> {
        let mut metadata = self.get_secret(uri).await?;
        let now = Utc::now();

        if let Some(label) = &params.label {
            metadata.label = Some(label.clone()).filter(|l| !l.is_empty());
        }
        if let Some(description) = &params.description {
            metadata.description = Some(description.clone()).filter(|d| !d.is_empty());
        }
        if let Some(policy) = params.rotate_policy {
            if params.next_rotate_time.is_none() {
                if !policy.will_rotate() {
                    metadata.next_rotate_time = None;
                } else if policy != metadata.rotate_policy || metadata.next_rotate_time.is_none() {
                    metadata.next_rotate_time = policy.next_rotate_time(now);
                }
            }
            metadata.rotate_policy = policy;
        }
        if let Some(next) = params.next_rotate_time {
            metadata.next_rotate_time = next;
        }
        if !metadata.rotate_policy.will_rotate() && metadata.next_rotate_time.is_some() {
            return Err(SecretsError::validation_field(
                "next rotate time cannot be set when the rotate policy is never",
                "next_rotate_time",
            ));
        }
        if let Some(expire) = params.expire_time {
            metadata.expire_time = expire;
        }
        if let Some(options) = options {
            metadata.params = options;
        }

        let mut ops = Vec::with_capacity(2 + content_ops.len());
        let revision = match new_revision {
            Some(new) => {
                if new.revision != metadata.latest_revision + 1 {
                    return Err(SecretsError::already_exists("secret revision", uri.name(new.revision)));
                }
                let revision = SecretRevision {
                    uri: uri.clone(),
                    revision: new.revision,
                    address: uri.name(new.revision),
                    checksum: new.checksum,
                    create_time: now,
                };
                ops.push(TxnOp::insert(
                    REVISIONS_COLLECTION,
                    revision.address.clone(),
                    serde_json::to_value(RevisionDoc { model_uuid: self.model_uuid, revision: revision.clone() })?,
                ));
                metadata.latest_revision = new.revision;
                Some(revision)
            }
            None => None,
        };

        metadata.version += 1;
        metadata.update_time = now;
        ops.insert(
            0,
            TxnOp::update(
                SECRETS_COLLECTION,
                uri.id(),
                serde_json::to_value(SecretDoc { model_uuid: self.model_uuid, metadata: metadata.clone() })?,
            ),
        );
        ops.extend(content_ops);

        self.store.run_transaction(ops).await.map_err(|e| match e {
            StorageError::AlreadyExists { id, .. } => SecretsError::already_exists("secret revision", id),
            StorageError::NotFound { .. } => SecretsError::not_found("secret", uri.to_string()),
            other => other.into(),
        })?;

        debug!(version = metadata.version, latest_revision = metadata.latest_revision, "Updated secret metadata");
        Ok((metadata, revision))
    }

    /// Secrets of this model ordered by URI. Every call re-queries the store.
    #[instrument(skip(self), name = "db_list_secrets")]
    pub async fn list_secrets(&self, filter: &SecretFilter) -> Result<Vec<SecretMetadata>> {
        let mut query = self.model_filter();
        if let Some(owner) = &filter.owner_tag {
            query = query.eq("owner_tag", owner.to_string());
        }
        self.store
            .find(SECRETS_COLLECTION, &query)
            .await?
            .into_iter()
            .map(|doc| Ok(serde_json::from_value::<SecretDoc>(doc.body)?.metadata))
            .collect()
    }

    /// Remove a secret's metadata, revisions and grants, leaving a tombstone.
    ///
    /// Returns the removed revisions. A missing secret removes nothing.
    /// `extra_ops` are committed in the same transaction.
    #[instrument(skip(self, extra_ops), fields(uri = %uri), name = "db_delete_secret")]
    pub async fn delete_secret(&self, uri: &SecretUri, extra_ops: Vec<TxnOp>) -> Result<Vec<SecretRevision>> {
        if self.secret_doc(uri).await?.is_none() {
            debug!("Secret already deleted");
            return Ok(Vec::new());
        }

        let revisions = self.list_revisions(uri).await?;
        let grants = self
            .store
            .find(PERMISSIONS_COLLECTION, &self.model_filter().eq("uri", uri.to_string()))
            .await?;

        let mut ops = vec![TxnOp::delete(SECRETS_COLLECTION, uri.id())];
        ops.extend(revisions.iter().map(|r| TxnOp::delete(REVISIONS_COLLECTION, r.address.clone())));
        ops.extend(grants.into_iter().map(|g| TxnOp::delete(PERMISSIONS_COLLECTION, g.id)));
        ops.push(TxnOp::upsert(
            TOMBSTONES_COLLECTION,
            uri.id(),
            serde_json::to_value(TombstoneDoc {
                model_uuid: self.model_uuid,
                uri: uri.clone(),
                delete_time: Utc::now(),
            })?,
        ));
        ops.extend(extra_ops);
        self.store.run_transaction(ops).await?;

        debug!(revisions = revisions.len(), "Deleted secret metadata");
        Ok(revisions)
    }

    /// Revisions of `uri` in ascending order.
    #[instrument(skip(self), fields(uri = %uri), name = "db_list_revisions")]
    pub async fn list_revisions(&self, uri: &SecretUri) -> Result<Vec<SecretRevision>> {
        let docs = self
            .store
            .find(REVISIONS_COLLECTION, &self.model_filter().eq("uri", uri.to_string()))
            .await?;
        let mut revisions = docs
            .into_iter()
            .map(|doc| Ok(serde_json::from_value::<RevisionDoc>(doc.body)?.revision))
            .collect::<Result<Vec<_>>>()?;
        revisions.sort_by_key(|r| r.revision);
        Ok(revisions)
    }

    #[instrument(skip(self), fields(uri = %uri), name = "db_get_revision")]
    pub async fn get_revision(&self, uri: &SecretUri, revision: u32) -> Result<SecretRevision> {
        let not_found = || SecretsError::not_found("secret revision", format!("{}/{}", uri, revision));
        let body = self
            .store
            .get(REVISIONS_COLLECTION, &uri.name(revision))
            .await?
            .ok_or_else(not_found)?;
        let doc: RevisionDoc = serde_json::from_value(body)?;
        if doc.model_uuid != self.model_uuid {
            return Err(not_found());
        }
        Ok(doc.revision)
    }

    /// Let `subject` read every revision of `uri`.
    #[instrument(skip(self), fields(uri = %uri, subject = %subject), name = "db_grant_access")]
    pub async fn grant_access(&self, uri: &SecretUri, subject: &EntityTag) -> Result<()> {
        self.get_secret(uri).await?;
        let doc = PermissionDoc { model_uuid: self.model_uuid, uri: uri.clone(), subject: subject.clone() };
        self.store
            .run_transaction(vec![TxnOp::upsert(
                PERMISSIONS_COLLECTION,
                permission_id(uri, subject),
                serde_json::to_value(doc)?,
            )])
            .await?;
        Ok(())
    }

    /// Remove a grant. Revoking a missing grant is not an error.
    #[instrument(skip(self), fields(uri = %uri, subject = %subject), name = "db_revoke_access")]
    pub async fn revoke_access(&self, uri: &SecretUri, subject: &EntityTag) -> Result<()> {
        self.store
            .run_transaction(vec![TxnOp::delete(PERMISSIONS_COLLECTION, permission_id(uri, subject))])
            .await?;
        Ok(())
    }

    /// Subjects granted read access to `uri`.
    pub async fn list_grants(&self, uri: &SecretUri) -> Result<Vec<EntityTag>> {
        self.store
            .find(PERMISSIONS_COLLECTION, &self.model_filter().eq("uri", uri.to_string()))
            .await?
            .into_iter()
            .map(|doc| Ok(serde_json::from_value::<PermissionDoc>(doc.body)?.subject))
            .collect()
    }

    /// Every revision of every secret `subject` may read.
    ///
    /// A unit also sees grants made to its application.
    #[instrument(skip(self), fields(subject = %subject), name = "db_consumed_by")]
    pub async fn consumed_by(&self, subject: &EntityTag) -> Result<SecretRevisions> {
        let mut subjects = vec![subject.clone()];
        if subject.kind() == TagKind::Unit {
            if let Some(app) = subject.application_name() {
                subjects.push(EntityTag::application(app)?);
            }
        }

        let mut consumed = SecretRevisions::new();
        for s in &subjects {
            let grants = self
                .store
                .find(PERMISSIONS_COLLECTION, &self.model_filter().eq("subject", s.to_string()))
                .await?;
            for grant in grants {
                let grant: PermissionDoc = serde_json::from_value(grant.body)?;
                let revisions = self.list_revisions(&grant.uri).await?;
                consumed.add(grant.uri, revisions.into_iter().map(|r| r.revision));
            }
        }
        Ok(consumed)
    }

    /// Every revision of every secret owned by `owner`.
    #[instrument(skip(self), fields(owner = %owner), name = "db_owned_by")]
    pub async fn owned_by(&self, owner: &EntityTag) -> Result<SecretRevisions> {
        let mut owned = SecretRevisions::new();
        for metadata in self.list_secrets(&SecretFilter::owned_by(owner.clone())).await? {
            let revisions = self.list_revisions(&metadata.uri).await?;
            owned.add(metadata.uri, revisions.into_iter().map(|r| r.revision));
        }
        Ok(owned)
    }
}
