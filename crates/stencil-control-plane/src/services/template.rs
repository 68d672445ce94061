// Workflow template service
// Decision: PostgreSQL holds the history of record; the cluster store follows
// Decision: Inner functions return adapter errors; public wrappers log them once and map to TemplateError
//
// Write ordering:
// - create: insert rows in a transaction, create the cluster object, commit.
//   A failed cluster create rolls back; a failed commit deletes the object.
// - append: commit the new version first, then demote the old latest cluster
//   object and create the new one. Cluster failures after commit surface as
//   PartialFailure and are safe to retry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use stencil_core::manifest::{self, ManifestError, ManifestValidator, StructuralValidator};
use stencil_core::{
    filter_by_prefix, is_slug, object_name, reconcile_version, slugify, LabelCodec, LabelError,
    NewTemplate, NewTemplateVersion, Pagination, SystemClock, TemplateError, VersionAgreement,
    VersionClock, VersionPolicy, VersionSelector, WorkflowExecutionStatisticReport,
    WorkflowTemplate, WorkflowTemplateVersion,
};
use stencil_storage::{
    ClusterError, ClusterObject, ClusterStore, CreateTemplateRow, CreateTemplateVersionRow,
    StorageBackend, StoreError, TemplateSummaryRow, TemplateWithVersionRow,
};
use tracing::{debug, error, info, warn};

/// Failure inside an operation, before it is mapped for the caller
#[derive(Debug, thiserror::Error)]
enum SyncError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Label(#[from] LabelError),
}

impl SyncError {
    /// Errors the caller caused, as opposed to store failures
    fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SyncError::Manifest(_)
                | SyncError::Template(TemplateError::InvalidArgument(_))
                | SyncError::Template(TemplateError::NotFound(_))
                | SyncError::Store(StoreError::NotFound(_))
                | SyncError::Cluster(ClusterError::NotFound(_))
        )
    }

    /// Caller-facing error. Adapter text stays in the logs; only messages
    /// built by this service are passed through.
    fn into_template_error(self, namespace: &str, subject: &str) -> TemplateError {
        match self {
            SyncError::Template(e) => e,
            SyncError::Manifest(e) => TemplateError::invalid_argument(e.to_string()),
            SyncError::Store(StoreError::NotFound(_))
            | SyncError::Cluster(ClusterError::NotFound(_)) => {
                template_not_found(namespace, subject)
            }
            SyncError::Store(StoreError::Conflict(_))
            | SyncError::Cluster(ClusterError::Conflict(_)) => TemplateError::already_exists(
                format!("workflow template {}/{}", namespace, subject),
            ),
            SyncError::Store(_) | SyncError::Cluster(_) => TemplateError::Unknown,
            SyncError::Label(e) => TemplateError::invariant(e.to_string()),
        }
    }
}

/// Log a failed operation with its context and map it for the caller.
fn surface(operation: &'static str, namespace: &str, subject: &str, err: SyncError) -> TemplateError {
    if err.is_caller_error() {
        debug!(operation, namespace, subject, error = %err, "workflow template request rejected");
    } else {
        error!(operation, namespace, subject, error = %err, "workflow template operation failed");
    }
    err.into_template_error(namespace, subject)
}

fn template_not_found(namespace: &str, uid: &str) -> TemplateError {
    TemplateError::not_found(format!("workflow template {}/{}", namespace, uid))
}

pub struct TemplateService {
    db: StorageBackend,
    cluster: Arc<dyn ClusterStore>,
    validator: Arc<dyn ManifestValidator>,
    codec: LabelCodec,
    clock: Arc<dyn VersionClock>,
    policy: VersionPolicy,
}

impl TemplateService {
    pub fn new(db: StorageBackend, cluster: Arc<dyn ClusterStore>) -> Self {
        Self {
            db,
            cluster,
            validator: Arc::new(StructuralValidator),
            codec: LabelCodec::default(),
            clock: Arc::new(SystemClock),
            policy: VersionPolicy::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ManifestValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_codec(mut self, codec: LabelCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn VersionClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: VersionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn codec(&self) -> &LabelCodec {
        &self.codec
    }

    // ============================================
    // Public operations
    // ============================================

    /// Create a template with its first version.
    pub async fn create_template(
        &self,
        namespace: &str,
        template: NewTemplate,
    ) -> Result<WorkflowTemplate, TemplateError> {
        let name = template.name.clone();
        self.create_template_inner(namespace, template)
            .await
            .map_err(|e| surface("create_template", namespace, &name, e))
    }

    /// Append a version and make it the latest.
    pub async fn create_template_version(
        &self,
        namespace: &str,
        template: NewTemplateVersion,
    ) -> Result<WorkflowTemplate, TemplateError> {
        let uid = template.uid.clone();
        self.create_template_version_inner(namespace, template)
            .await
            .map_err(|e| surface("create_template_version", namespace, &uid, e))
    }

    /// Read one version; `version == 0` means latest.
    pub async fn get_template(
        &self,
        namespace: &str,
        uid: &str,
        version: i64,
    ) -> Result<WorkflowTemplate, TemplateError> {
        self.get_template_inner(namespace, uid, version)
            .await
            .map_err(|e| surface("get_template", namespace, uid, e))
    }

    /// Relational-only read by name; `version == 0` means the highest version.
    pub async fn get_template_by_name(
        &self,
        namespace: &str,
        name: &str,
        version: i64,
    ) -> Result<WorkflowTemplate, TemplateError> {
        self.get_template_by_name_inner(namespace, name, version)
            .await
            .map_err(|e| surface("get_template_by_name", namespace, name, e))
    }

    /// Every version of a template, newest first.
    pub async fn list_template_versions(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Vec<WorkflowTemplate>, TemplateError> {
        self.list_template_versions_inner(namespace, uid)
            .await
            .map_err(|e| surface("list_template_versions", namespace, uid, e))
    }

    /// Latest version of every non-archived template in the namespace.
    pub async fn list_templates(
        &self,
        namespace: &str,
    ) -> Result<Vec<WorkflowTemplate>, TemplateError> {
        self.list_templates_inner(namespace, None)
            .await
            .map_err(|e| surface("list_templates", namespace, "*", e))
    }

    pub async fn list_templates_page(
        &self,
        namespace: &str,
        page: Pagination,
    ) -> Result<Vec<WorkflowTemplate>, TemplateError> {
        self.list_templates_inner(namespace, Some(page))
            .await
            .map_err(|e| surface("list_templates", namespace, "*", e))
    }

    /// Soft delete. Leaves versions and cluster objects untouched.
    pub async fn archive_template(&self, namespace: &str, uid: &str) -> Result<bool, TemplateError> {
        self.archive_template_inner(namespace, uid)
            .await
            .map_err(|e| surface("archive_template", namespace, uid, e))
    }

    /// Labels of one version's cluster object that start with `prefix`,
    /// prefix removed. Any lookup failure is reported as not found.
    pub async fn get_template_labels(
        &self,
        namespace: &str,
        uid: &str,
        prefix: &str,
        version: i64,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        self.get_template_labels_inner(namespace, uid, prefix, version)
            .await
            .map_err(|e| match surface("get_template_labels", namespace, uid, e) {
                kept @ (TemplateError::InvariantViolation(_) | TemplateError::InvalidArgument(_)) => {
                    kept
                }
                _ => TemplateError::not_found(format!(
                    "labels of workflow template {}/{}",
                    namespace, uid
                )),
            })
    }

    // ============================================
    // Create
    // ============================================

    async fn create_template_inner(
        &self,
        namespace: &str,
        template: NewTemplate,
    ) -> Result<WorkflowTemplate, SyncError> {
        let envelope = self.validated_envelope(&template.manifest)?;
        let name = template.name.trim().to_string();
        let uid = slugify(&name);
        if uid.is_empty() {
            return Err(TemplateError::invalid_argument(format!(
                "template name {:?} has no usable characters",
                template.name
            ))
            .into());
        }

        let version = self.policy.next(self.clock.epoch_seconds(), None);

        let mut tx = self.db.begin().await?;
        let row = tx
            .insert_template(CreateTemplateRow {
                uid,
                name,
                namespace: namespace.to_string(),
            })
            .await?;
        let version_row = tx
            .insert_version(CreateTemplateVersionRow {
                workflow_template_id: row.id,
                version,
                is_latest: true,
                manifest: template.manifest.clone(),
            })
            .await?;

        let object = self.build_object(
            namespace,
            &row.uid,
            &row.name,
            version,
            &template.manifest,
            &envelope,
            &template.labels,
        )?;
        let created_name = object.metadata.name.clone();

        if let Err(e) = self.cluster.create(namespace, object).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(namespace, uid = %row.uid, error = %rollback_err, "rollback after failed cluster create failed");
            }
            return Err(e.into());
        }

        if let Err(commit_err) = tx.commit().await {
            if let Err(delete_err) = self.cluster.delete(namespace, &created_name).await {
                error!(
                    namespace,
                    name = %created_name,
                    error = %delete_err,
                    "compensating delete failed, cluster object has no relational row"
                );
            }
            return Err(commit_err.into());
        }

        info!(namespace, uid = %row.uid, version, "created workflow template");

        Ok(WorkflowTemplate {
            id: row.id,
            uid: row.uid,
            name: row.name,
            namespace: row.namespace,
            created_at: row.created_at,
            is_archived: row.is_archived,
            version: version_row.version,
            manifest: version_row.manifest,
            is_latest: true,
            version_created_at: version_row.created_at,
            labels: template.labels,
            versions: Some(1),
            statistics: None,
        })
    }

    // ============================================
    // Append version
    // ============================================

    async fn create_template_version_inner(
        &self,
        namespace: &str,
        input: NewTemplateVersion,
    ) -> Result<WorkflowTemplate, SyncError> {
        let envelope = self.validated_envelope(&input.manifest)?;

        let template = self
            .db
            .get_template(namespace, &input.uid)
            .await?
            .ok_or_else(|| template_not_found(namespace, &input.uid))?;

        let mut tx = self.db.begin().await?;
        let current = match self.policy {
            VersionPolicy::Monotonic => tx.max_version(template.id).await?,
            VersionPolicy::EpochSeconds => None,
        };
        let version = self.policy.next(self.clock.epoch_seconds(), current);

        tx.demote_versions(template.id).await?;
        let version_row = tx
            .insert_version(CreateTemplateVersionRow {
                workflow_template_id: template.id,
                version,
                is_latest: true,
                manifest: input.manifest.clone(),
            })
            .await?;
        tx.commit().await?;

        if let Err(e) = self
            .promote_in_cluster(namespace, &template.uid, &template.name, version, &input, &envelope)
            .await
        {
            error!(
                namespace,
                uid = %template.uid,
                version,
                error = %e,
                "cluster store did not follow committed version"
            );
            let message = match e {
                SyncError::Template(TemplateError::InvariantViolation(msg)) => msg,
                _ => "latest marker was not moved".to_string(),
            };
            return Err(TemplateError::partial(version, message).into());
        }

        info!(namespace, uid = %template.uid, version, "appended workflow template version");

        Ok(WorkflowTemplate {
            id: template.id,
            uid: template.uid,
            name: template.name,
            namespace: template.namespace,
            created_at: template.created_at,
            is_archived: template.is_archived,
            version: version_row.version,
            manifest: version_row.manifest,
            is_latest: true,
            version_created_at: version_row.created_at,
            labels: input.labels,
            versions: None,
            statistics: None,
        })
    }

    /// Move the latest marker in the cluster store to `version`.
    async fn promote_in_cluster(
        &self,
        namespace: &str,
        uid: &str,
        name: &str,
        version: i64,
        input: &NewTemplateVersion,
        envelope: &[u8],
    ) -> Result<(), SyncError> {
        let latest = self
            .cluster
            .list(namespace, &self.codec.selector(uid, VersionSelector::Latest))
            .await?;
        match latest.len() {
            0 => debug!(namespace, uid, "no latest cluster object to demote"),
            1 => {}
            n => {
                return Err(TemplateError::invariant(format!(
                    "{} cluster objects of {}/{} carry the latest marker, expected one",
                    n, namespace, uid
                ))
                .into());
            }
        }

        for mut previous in latest {
            self.codec.clear_latest(&mut previous.metadata.labels);
            self.cluster.update(namespace, previous).await?;
        }

        let mut object =
            self.build_object(namespace, uid, name, version, &input.manifest, envelope, &input.labels)?;
        object.strip_server_metadata();
        self.cluster.create(namespace, object).await?;
        Ok(())
    }

    // ============================================
    // Reads
    // ============================================

    async fn get_template_inner(
        &self,
        namespace: &str,
        uid: &str,
        version: i64,
    ) -> Result<WorkflowTemplate, SyncError> {
        let selector = VersionSelector::from_request(version);

        let row = self
            .db
            .get_template_version(namespace, uid, selector)
            .await?
            .ok_or_else(|| {
                TemplateError::not_found(format!(
                    "workflow template {}/{} version {}",
                    namespace, uid, selector
                ))
            })?;

        let object = self.single_object(namespace, uid, selector).await?;
        let cluster_version = self.codec.decode_version(object.labels())?;

        let agreement = reconcile_version(row.version, cluster_version);
        if let VersionAgreement::Divergent {
            db_version,
            cluster_version,
        } = agreement
        {
            warn!(
                namespace,
                uid,
                db_version,
                cluster_version,
                "relational and cluster versions disagree, using cluster label"
            );
        }

        let mut template = Self::from_row(row);
        template.version = agreement.cluster_version();
        template.labels = self.codec.tags(object.labels());
        Ok(template)
    }

    async fn get_template_by_name_inner(
        &self,
        namespace: &str,
        name: &str,
        version: i64,
    ) -> Result<WorkflowTemplate, SyncError> {
        let row = self
            .db
            .get_template_by_name(namespace, name, VersionSelector::from_request(version))
            .await?
            .ok_or_else(|| {
                TemplateError::not_found(format!("workflow template named {}/{}", namespace, name))
            })?;
        Ok(Self::from_row(row))
    }

    async fn list_template_versions_inner(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Vec<WorkflowTemplate>, SyncError> {
        let template = self.get_template_inner(namespace, uid, 0).await?;

        let objects = self
            .cluster
            .list(namespace, &self.codec.identity_selector(uid))
            .await?;

        let by_version: HashMap<i64, WorkflowTemplateVersion> = self
            .db
            .list_template_versions(namespace, uid)
            .await?
            .into_iter()
            .map(|row| (row.version, WorkflowTemplateVersion::from(row)))
            .collect();

        let mut versions = Vec::with_capacity(objects.len());
        for object in objects {
            let version = self.codec.decode_version(object.labels())?;
            let row = by_version.get(&version).ok_or_else(|| {
                TemplateError::invariant(format!(
                    "cluster object {} has no relational version {}",
                    object.name(),
                    version
                ))
            })?;

            versions.push(WorkflowTemplate {
                id: template.id,
                uid: template.uid.clone(),
                name: template.name.clone(),
                namespace: template.namespace.clone(),
                created_at: template.created_at,
                is_archived: template.is_archived,
                version,
                manifest: row.manifest.clone(),
                is_latest: self.codec.is_latest(object.labels()),
                version_created_at: object.metadata.creation_timestamp.unwrap_or(row.created_at),
                labels: self.codec.tags(object.labels()),
                versions: None,
                statistics: None,
            });
        }

        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn list_templates_inner(
        &self,
        namespace: &str,
        page: Option<Pagination>,
    ) -> Result<Vec<WorkflowTemplate>, SyncError> {
        let rows = self.db.list_templates(namespace, page).await?;

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut statistics: HashMap<i64, WorkflowExecutionStatisticReport> = self
            .db
            .execution_statistics(&ids)
            .await?
            .into_iter()
            .map(|row| (row.workflow_template_id, row.into()))
            .collect();

        let tag_prefix = self.codec.keys().tag_prefix;
        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            let mut template = Self::from_summary(row);
            template.statistics = Some(statistics.remove(&template.id).unwrap_or_default());

            match self
                .get_template_labels_inner(namespace, &template.uid, tag_prefix, template.version)
                .await
            {
                Ok(labels) => template.labels = labels,
                Err(e) => {
                    warn!(namespace, uid = %template.uid, error = %e, "could not read template labels");
                }
            }
            templates.push(template);
        }

        Ok(templates)
    }

    async fn archive_template_inner(&self, namespace: &str, uid: &str) -> Result<bool, SyncError> {
        self.db
            .get_template(namespace, uid)
            .await?
            .ok_or_else(|| template_not_found(namespace, uid))?;

        let affected = self.db.archive_template(namespace, uid).await?;
        if affected == 0 {
            error!(namespace, uid, "archive matched no rows after lookup succeeded");
            return Err(TemplateError::Unknown.into());
        }

        info!(namespace, uid, "archived workflow template");
        Ok(true)
    }

    async fn get_template_labels_inner(
        &self,
        namespace: &str,
        uid: &str,
        prefix: &str,
        version: i64,
    ) -> Result<BTreeMap<String, String>, SyncError> {
        if !is_slug(uid) {
            return Err(TemplateError::invalid_argument(format!(
                "template uid {:?} is not a valid identity",
                uid
            ))
            .into());
        }
        let object = self
            .single_object(namespace, uid, VersionSelector::from_request(version))
            .await?;
        Ok(filter_by_prefix(object.labels(), prefix))
    }

    // ============================================
    // Helpers
    // ============================================

    fn validated_envelope(&self, body: &str) -> Result<Vec<u8>, SyncError> {
        let envelope = manifest::wrap(body)?;
        self.validator.validate(&envelope)?;
        Ok(envelope)
    }

    /// Cluster object for a version, carrying the latest marker.
    #[allow(clippy::too_many_arguments)]
    fn build_object(
        &self,
        namespace: &str,
        uid: &str,
        name: &str,
        version: i64,
        body: &str,
        envelope: &[u8],
        tags: &BTreeMap<String, String>,
    ) -> Result<ClusterObject, SyncError> {
        let labels = self.codec.encode(uid, name, version, true, tags);
        let annotations = manifest::extract_parameters(body)?;
        let object = ClusterObject::from_envelope(
            envelope,
            object_name(&slugify(name), version),
            namespace,
            labels,
            annotations,
        )?;
        Ok(object)
    }

    /// The one cluster object matching a version selector.
    async fn single_object(
        &self,
        namespace: &str,
        uid: &str,
        version: VersionSelector,
    ) -> Result<ClusterObject, SyncError> {
        let selector = self.codec.selector(uid, version);
        let mut objects = self.cluster.list(namespace, &selector).await?;
        match objects.len() {
            0 => Err(TemplateError::not_found(format!(
                "cluster object for {}/{} version {}",
                namespace, uid, version
            ))
            .into()),
            1 => Ok(objects.remove(0)),
            n => Err(TemplateError::invariant(format!(
                "{} cluster objects match {}, expected one",
                n, selector
            ))
            .into()),
        }
    }

    fn from_row(row: TemplateWithVersionRow) -> WorkflowTemplate {
        WorkflowTemplate {
            id: row.id,
            uid: row.uid,
            name: row.name,
            namespace: row.namespace,
            created_at: row.created_at,
            is_archived: row.is_archived,
            version: row.version,
            manifest: row.manifest,
            is_latest: row.is_latest,
            version_created_at: row.version_created_at,
            labels: BTreeMap::new(),
            versions: None,
            statistics: None,
        }
    }

    fn from_summary(row: TemplateSummaryRow) -> WorkflowTemplate {
        WorkflowTemplate {
            id: row.id,
            uid: row.uid,
            name: row.name,
            namespace: row.namespace,
            created_at: row.created_at,
            is_archived: row.is_archived,
            version: row.version,
            manifest: row.manifest,
            is_latest: row.is_latest,
            version_created_at: row.version_created_at,
            labels: BTreeMap::new(),
            versions: Some(row.versions),
            statistics: None,
        }
    }
}
