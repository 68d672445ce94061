// Apply database migrations
//
// Usage: DATABASE_URL=postgres://... cargo run --bin stencil-migrate

use anyhow::{bail, Context, Result};
use stencil_control_plane::telemetry::init_tracing;
use stencil_control_plane::ControlPlaneConfig;
use stencil_storage::StorageBackend;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ControlPlaneConfig::from_env()?;
    if config.database_url.is_none() {
        bail!("DATABASE_URL environment variable required");
    }

    let StorageBackend::Postgres(db) = config.storage().await? else {
        bail!("migrations need a PostgreSQL backend");
    };

    db.migrate().await.context("Failed to apply migrations")?;
    tracing::info!("Migrations applied");
    Ok(())
}
