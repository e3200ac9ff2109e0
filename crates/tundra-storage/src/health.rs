//! Vault health check

use anyhow::Result;
use serde::Serialize;

use crate::vault::Vault;

/// What `tundra status` reports about a reachable vault
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backend: String,
    pub vault: String,
    pub archives: usize,
    pub pending_uploads: usize,
}

/// Verify the backend is reachable by listing the vault
pub async fn check_health(vault: &Vault) -> Result<HealthReport> {
    let archives = vault
        .list_archives()
        .await
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))?;
    let pending_uploads = vault
        .pending_uploads()
        .await
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))?;

    Ok(HealthReport {
        backend: vault.operator().info().scheme().to_string(),
        vault: vault.name().to_string(),
        archives: archives.len(),
        pending_uploads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_memory_vault_is_healthy() {
        let op = opendal::Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let vault = Vault::new(op, "health");

        let report = check_health(&vault).await.unwrap();
        assert_eq!(report.vault, "health");
        assert_eq!(report.archives, 0);
        assert_eq!(report.pending_uploads, 0);
        assert_eq!(report.backend, "memory");
    }
}
