//! Hit log maintenance

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::commands::CommandContext;
use crate::output::colors;

/// Delete hits older than `days` days
pub async fn purge(ctx: &CommandContext, days: u32) -> Result<()> {
    let cutoff = purge_cutoff(Utc::now(), days)?;
    let purged = ctx.repos.hits.purge_before(cutoff).await?;

    info!(%cutoff, purged, "Hit log purged");
    println!(
        "{}",
        colors::success(&format!("Purged {} hits recorded before {}", purged, cutoff.format("%Y-%m-%d")))
    );
    Ok(())
}

/// `now` minus `days` whole days
fn purge_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    if days == 0 {
        anyhow::bail!("--older-than must be at least one day");
    }
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| anyhow::anyhow!("--older-than {} reaches before the earliest representable date", days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_purge_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let cutoff = purge_cutoff(now, 180).unwrap();
        assert_eq!(now - cutoff, Duration::days(180));
        assert!(purge_cutoff(now, 0).is_err());
    }

    #[test]
    fn test_purge_cutoff_rejects_overflow() {
        let now = Utc.with_ymd_and_hms(-200_000, 1, 1, 0, 0, 0).unwrap();
        assert!(purge_cutoff(now, u32::MAX).is_err());
    }
}
