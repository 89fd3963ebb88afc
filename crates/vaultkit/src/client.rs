//! Blocking HTTP client for the Vault API.

use crate::backend::{HealthStatus, MountConfig, VaultApi};
use crate::certificate::{Certificate, IssueResponse};
use crate::error::Result;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault client authenticated with a token.
///
/// # Example
///
/// ```no_run
/// use vaultkit::VaultClient;
/// use vaultkit::backend::VaultApi;
///
/// let vault = VaultClient::new("https://vault.dev.example.com:8200", "s.token");
/// let health = vault.health().unwrap();
/// println!("sealed: {}", health.sealed);
/// ```
pub struct VaultClient {
    agent: ureq::Agent,
    address: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PolicyData {
    policy: String,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<String>,
}

impl VaultClient {
    #[must_use]
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            address: address.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    /// GET `path` and unwrap its `data` field; `None` on 404
    fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self
            .agent
            .get(&self.url(path))
            .header(TOKEN_HEADER, self.token.as_str())
            .call()
        {
            Ok(mut response) => {
                let envelope: DataEnvelope<T> = response.body_mut().read_json()?;
                Ok(Some(envelope.data))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every enabled mount keyed by path with a trailing slash
    fn mount_table(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let table: Option<BTreeMap<String, serde_json::Value>> = self.get_data("sys/mounts")?;
        Ok(table.unwrap_or_default())
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        self.agent
            .post(&self.url(path))
            .header(TOKEN_HEADER, self.token.as_str())
            .send_json(body)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.agent
            .delete(&self.url(path))
            .header(TOKEN_HEADER, self.token.as_str())
            .call()?;
        Ok(())
    }
}

impl VaultApi for VaultClient {
    fn health(&self) -> Result<HealthStatus> {
        // report sealed and uninitialized servers with 200 so the body is readable
        let status: HealthStatus = self
            .agent
            .get(&self.url("sys/health?standbyok=true&sealedcode=200&uninitcode=200"))
            .call()?
            .body_mut()
            .read_json()?;
        Ok(status)
    }

    fn read_policy(&self, name: &str) -> Result<Option<String>> {
        let policy: Option<PolicyData> = self.get_data(&format!("sys/policies/acl/{name}"))?;
        Ok(policy.map(|p| p.policy))
    }

    fn write_policy(&self, name: &str, policy: &str) -> Result<()> {
        self.post(&format!("sys/policies/acl/{name}"), &json!({ "policy": policy }))
    }

    fn delete_policy(&self, name: &str) -> Result<()> {
        self.delete(&format!("sys/policies/acl/{name}"))
    }

    fn list_policies(&self) -> Result<Vec<String>> {
        let list: Option<KeyList> = self.get_data("sys/policies/acl?list=true")?;
        Ok(list.map(|l| l.keys).unwrap_or_default())
    }

    fn read_mount(&self, path: &str) -> Result<Option<MountConfig>> {
        // sys/mounts/:path answers 400 for an unmounted path, the table does not
        let mut table = self.mount_table()?;
        table
            .remove(&format!("{}/", path.trim_matches('/')))
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    fn enable_mount(&self, path: &str, config: &MountConfig) -> Result<()> {
        self.post(
            &format!("sys/mounts/{path}"),
            &json!({
                "type": config.engine_type,
                "description": config.description,
                "options": config.options,
            }),
        )
    }

    fn tune_mount(&self, path: &str, config: &MountConfig) -> Result<()> {
        self.post(
            &format!("sys/mounts/{path}/tune"),
            &json!({
                "description": config.description,
                "options": config.options,
            }),
        )
    }

    fn disable_mount(&self, path: &str) -> Result<()> {
        self.delete(&format!("sys/mounts/{path}"))
    }

    fn list_mounts(&self) -> Result<Vec<String>> {
        Ok(self
            .mount_table()?
            .into_keys()
            .map(|path| path.trim_end_matches('/').to_string())
            .collect())
    }

    fn issue_certificate(&self, pki_mount: &str, role: &str, common_name: &str) -> Result<Certificate> {
        let envelope: DataEnvelope<IssueResponse> = self
            .agent
            .post(&self.url(&format!("{pki_mount}/issue/{role}")))
            .header(TOKEN_HEADER, self.token.as_str())
            .send_json(json!({ "common_name": common_name }))?
            .body_mut()
            .read_json()?;
        envelope.data.into_certificate()
    }

    fn seal(&self) -> Result<()> {
        log::info!("sealing vault at address '{}'", self.address);
        self.agent
            .post(&self.url("sys/seal"))
            .header(TOKEN_HEADER, self.token.as_str())
            .send_empty()?;
        Ok(())
    }
}
