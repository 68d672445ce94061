// Query assembly for the template tables
//
// Statements are built with sqlx::QueryBuilder so optional filters and
// pagination keep their bind placeholders in order. Every template query is
// scoped to a namespace.

use sqlx::{Postgres, QueryBuilder};
use stencil_core::{Pagination, VersionSelector};

use crate::models::phase;

const TEMPLATE_COLUMNS: &str = "wt.id, wt.uid, wt.name, wt.namespace, wt.is_archived, wt.created_at";

const VERSION_COLUMNS: &str =
    "wtv.version, wtv.is_latest, wtv.manifest, wtv.created_at AS version_created_at";

const TEMPLATE_VERSION_JOIN: &str =
    " FROM workflow_templates wt JOIN workflow_template_versions wtv ON wtv.workflow_template_id = wt.id";

fn scoped(select: String, namespace: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" WHERE wt.namespace = ");
    qb.push_bind(namespace.to_string());
    qb
}

fn push_version(qb: &mut QueryBuilder<'static, Postgres>, version: VersionSelector) {
    match version {
        VersionSelector::Latest => {
            qb.push(" AND wtv.is_latest = TRUE");
        }
        VersionSelector::Exact(v) => {
            qb.push(" AND wtv.version = ");
            qb.push_bind(v);
        }
    }
}

/// Template row by identity
pub fn select_template(namespace: &str, uid: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = scoped(
        format!("SELECT {} FROM workflow_templates wt", TEMPLATE_COLUMNS),
        namespace,
    );
    qb.push(" AND wt.uid = ");
    qb.push_bind(uid.to_string());
    qb
}

/// Template joined with the latest or an exact version
pub fn select_template_version(
    namespace: &str,
    uid: &str,
    version: VersionSelector,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = scoped(
        format!(
            "SELECT {}, {}{}",
            TEMPLATE_COLUMNS, VERSION_COLUMNS, TEMPLATE_VERSION_JOIN
        ),
        namespace,
    );
    qb.push(" AND wt.uid = ");
    qb.push_bind(uid.to_string());
    push_version(&mut qb, version);
    qb
}

/// Template by name; "latest" here means the highest version number.
pub fn select_template_by_name(
    namespace: &str,
    name: &str,
    version: VersionSelector,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = scoped(
        format!(
            "SELECT {}, {}{}",
            TEMPLATE_COLUMNS, VERSION_COLUMNS, TEMPLATE_VERSION_JOIN
        ),
        namespace,
    );
    qb.push(" AND wt.name = ");
    qb.push_bind(name.to_string());
    if let VersionSelector::Exact(v) = version {
        qb.push(" AND wtv.version = ");
        qb.push_bind(v);
    }
    qb.push(" ORDER BY wtv.version DESC LIMIT 1");
    qb
}

/// Full version history of a template, newest first
pub fn select_template_versions(namespace: &str, uid: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = scoped(
        "SELECT wtv.id, wtv.workflow_template_id, wtv.version, wtv.is_latest, wtv.manifest, wtv.created_at \
         FROM workflow_template_versions wtv \
         JOIN workflow_templates wt ON wt.id = wtv.workflow_template_id"
            .to_string(),
        namespace,
    );
    qb.push(" AND wt.uid = ");
    qb.push_bind(uid.to_string());
    qb.push(" ORDER BY wtv.version DESC");
    qb
}

/// One row per non-archived template carrying its latest version and the
/// number of versions, newest template first.
pub fn select_latest_templates(
    namespace: &str,
    page: Option<Pagination>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = scoped(
        format!(
            "SELECT DISTINCT ON (wt.id) {}, {}, \
             (SELECT COUNT(*) FROM workflow_template_versions c WHERE c.workflow_template_id = wt.id) AS versions{}",
            TEMPLATE_COLUMNS, VERSION_COLUMNS, TEMPLATE_VERSION_JOIN
        ),
        namespace,
    );
    qb.push(" AND wt.is_archived = FALSE");
    qb.push(" ORDER BY wt.id DESC, wtv.is_latest DESC, wtv.version DESC");
    if let Some(page) = page {
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(page.limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::from(page.offset));
    }
    qb
}

/// Soft delete
pub fn archive_template(namespace: &str, uid: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE workflow_templates SET is_archived = TRUE WHERE namespace = ");
    qb.push_bind(namespace.to_string());
    qb.push(" AND uid = ");
    qb.push_bind(uid.to_string());
    qb
}

/// Per-template execution counters
pub fn select_execution_statistics(template_ids: &[i64]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT workflow_template_id, COUNT(*) AS total");
    for (alias, value) in [
        ("running", phase::RUNNING),
        ("completed", phase::SUCCEEDED),
        ("failed", phase::FAILED),
        ("terminated", phase::TERMINATED),
    ] {
        qb.push(", COUNT(*) FILTER (WHERE phase = ");
        qb.push_bind(value);
        qb.push(format!(") AS {}", alias));
    }
    qb.push(", MAX(created_at) AS last_executed FROM workflow_executions WHERE workflow_template_id = ANY(");
    qb.push_bind(template_ids.to_vec());
    qb.push(") GROUP BY workflow_template_id");
    qb
}
