pub mod cert;
pub mod reconcile;

use crate::Context;
use crate::config::{self, Manifest};
use anyhow::{Context as _, Result, anyhow, bail};
use std::sync::Arc;
use vaultkit::{VaultApi, VaultClient};

/// Load the manifest named on the command line, or the default one
pub fn load_manifest(ctx: &Context) -> Result<Manifest> {
    let path = config::manifest_path(ctx.manifest.as_deref())?;
    log::debug!("loading manifest from {}", path.display());
    Manifest::load(&path)
}

/// Vault client for the manifest's address and the token from the environment
///
/// Fails early when Vault cannot be reached or is not serving requests.
pub fn connect(ctx: &Context, manifest: &Manifest) -> Result<Arc<dyn VaultApi>> {
    let address = manifest
        .vault_address(ctx.vault_addr.as_deref())
        .context("No Vault address: set [vault].address in the manifest or VAULT_ADDR")?;
    let token = ctx
        .vault_token
        .clone()
        .context("VAULT_TOKEN is not set")?;

    log::info!("using Vault at {address}");
    let client = VaultClient::new(address.as_str(), token);

    let status = client
        .health()
        .map_err(with_advice)
        .with_context(|| format!("Could not reach Vault at {address}"))?;
    if !status.is_active() {
        bail!(
            "Vault at {address} is not ready (initialized: {}, sealed: {})",
            status.initialized,
            status.sealed
        );
    }

    Ok(Arc::new(client))
}

/// Turn a Vault error into one that also says what to check
pub fn with_advice(err: vaultkit::Error) -> anyhow::Error {
    let category = err.category();
    anyhow!("{category}: {err}\n  {}", category.advice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_advice() {
        let err = with_advice(vaultkit::Error::PermissionDenied("HTTP 403".to_string()));
        let message = err.to_string();

        assert!(message.starts_with("Vault rejected the token: "));
        assert!(message.contains("HTTP 403"));
        assert!(message.contains("Check VAULT_TOKEN"));
    }

    #[test]
    fn test_with_advice_for_unreachable_vault() {
        let err = with_advice(vaultkit::Error::http("connection refused", None));
        assert!(err.to_string().contains("reachable and unsealed"));
    }
}
