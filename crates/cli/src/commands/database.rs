//! Schema migrations and connectivity checks

use anyhow::Result;
use serde::Serialize;

use crate::commands::CommandContext;
use crate::output::{self, colors, TableFormatter};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub latency_ms: u128,
    pub pool_size: u32,
    pub idle_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Apply pending migrations
pub async fn migrate(ctx: &CommandContext) -> Result<()> {
    ctx.db.migrate().await?;
    println!("{}", colors::success("Migrations applied"));
    Ok(())
}

/// Ping the database and report pool usage; fails when unhealthy
pub async fn health(ctx: &CommandContext) -> Result<()> {
    let status = ctx.db.health_check().await?;
    let report = HealthReport {
        healthy: status.healthy,
        latency_ms: status.latency.as_millis(),
        pool_size: status.pool_size,
        idle_connections: status.idle_connections,
        error: status.error,
    };

    output::print(ctx.format, &report, |r| {
        TableFormatter::key_value(vec![
            ("Healthy", r.healthy.to_string()),
            ("Latency", format!("{} ms", r.latency_ms)),
            ("Pool size", r.pool_size.to_string()),
            ("Idle", r.idle_connections.to_string()),
            ("Error", r.error.clone().unwrap_or_else(|| "-".to_string())),
        ])
    })?;

    if !report.healthy {
        anyhow::bail!("database is unhealthy");
    }
    Ok(())
}
