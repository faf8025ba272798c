//! Azure Key Vault secret backend
//!
//! Selected by a vault directory whose `type` file holds `azure-key-vault`.
//! The directory also holds either a `name` file with the key vault name or
//! a `url` file with its URI.
//!
//! With `clientID`, `clientSecret` and `tenantID` files the backend signs in
//! as that service principal and reads secrets over the Key Vault REST API.
//! Without them it goes through the `az` CLI, so the usual `az login`
//! credentials apply.

mod rest;

use rest::{KeyVaultClient, ServicePrincipal};

use crate::runner::run_capture;
use anyhow::{Context, Result};
use jobkit::SecretSource;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Backend name in the vault `type` file
pub const AZURE_KEY_VAULT: &str = "azure-key-vault";

const NAME_KEY: &str = "name";
const URL_KEY: &str = "url";
const CLIENT_ID_KEY: &str = "clientID";
const CLIENT_SECRET_KEY: &str = "clientSecret";
const TENANT_ID_KEY: &str = "tenantID";

enum Client {
    /// `az keyvault secret show` with the CLI's login
    Cli { az: PathBuf, vault_name: String },
    Rest(KeyVaultClient),
}

/// Secrets from an Azure Key Vault, cached for the run
pub struct AzureKeyVault {
    client: Client,
    cache: RefCell<HashMap<String, Option<String>>>,
}

impl AzureKeyVault {
    fn with_client(client: Client) -> Self {
        Self {
            client,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Backend factory for [`jobkit::VaultBuilder::backend`]
    pub fn from_config(files: &HashMap<String, String>) -> Result<Box<dyn SecretSource>> {
        let client = match service_principal(files)? {
            Some(credentials) => {
                let url = vault_url(files)?;
                log::debug!("vault: azure key vault {url} as client {}", credentials.client_id);
                Client::Rest(KeyVaultClient::new(url, credentials))
            }
            None => {
                let vault_name = vault_name(files)?;
                let az = which::which("az").context("az CLI not found in PATH")?;
                log::debug!("vault: azure key vault {vault_name} via az");
                Client::Cli { az, vault_name }
            }
        };
        Ok(Box::new(Self::with_client(client)))
    }

    fn show(&self, key: &str) -> Result<Option<String>> {
        match &self.client {
            Client::Cli { az, vault_name } => az_show(az, vault_name, key),
            Client::Rest(client) => client.secret(key),
        }
    }
}

impl SecretSource for AzureKeyVault {
    fn fetch(&self, key: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.borrow().get(key) {
            return Ok(hit.clone());
        }
        let value = self.show(key)?;
        self.cache.borrow_mut().insert(key.to_string(), value.clone());
        Ok(value)
    }
}

fn az_show(az: &Path, vault_name: &str, key: &str) -> Result<Option<String>> {
    let args: Vec<String> = [
        "keyvault",
        "secret",
        "show",
        "--vault-name",
        vault_name,
        "--name",
        key,
        "--query",
        "value",
        "-o",
        "tsv",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    match run_capture(az, &args) {
        Ok(out) => Ok(Some(out.trim_end_matches(['\r', '\n']).to_string())),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Trimmed, non-empty content of a config file
fn setting<'a>(files: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    files.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Service principal from the credential files, `None` when there are none
fn service_principal(files: &HashMap<String, String>) -> Result<Option<ServicePrincipal>> {
    match (setting(files, CLIENT_ID_KEY), setting(files, CLIENT_SECRET_KEY)) {
        (None, None) => Ok(None),
        (Some(client_id), Some(client_secret)) => {
            let tenant_id = setting(files, TENANT_ID_KEY).with_context(|| {
                format!("{CLIENT_ID_KEY} and {CLIENT_SECRET_KEY} need a {TENANT_ID_KEY} file")
            })?;
            Ok(Some(ServicePrincipal {
                tenant_id: tenant_id.to_string(),
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
            }))
        }
        _ => anyhow::bail!(
            "{AZURE_KEY_VAULT} needs both {CLIENT_ID_KEY} and {CLIENT_SECRET_KEY}, or neither"
        ),
    }
}

/// Key vault name from the `name` file, or the first label of the `url` host
fn vault_name(files: &HashMap<String, String>) -> Result<String> {
    if let Some(name) = setting(files, NAME_KEY) {
        return Ok(name.to_string());
    }
    let url = setting(files, URL_KEY)
        .with_context(|| format!("{AZURE_KEY_VAULT} needs a {NAME_KEY} or {URL_KEY} file"))?;
    let host = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    match host.split('.').next() {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => anyhow::bail!("{URL_KEY}: cannot find a vault name in {url:?}"),
    }
}

/// Vault base URL without a trailing slash
fn vault_url(files: &HashMap<String, String>) -> Result<String> {
    let Some(url) = setting(files, URL_KEY) else {
        return Ok(format!("https://{}.vault.azure.net", vault_name(files)?));
    };
    let url = url.trim_end_matches('/');
    if url.contains("://") {
        Ok(url.to_string())
    } else {
        Ok(format!("https://{url}"))
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    let message = err.to_string();
    message.contains("SecretNotFound") || message.contains("was not found in this key vault")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_vault_name_from_name_file() {
        let f = files(&[("type", AZURE_KEY_VAULT), ("name", "kv-prod\n")]);
        assert_eq!(vault_name(&f).unwrap(), "kv-prod");
    }

    #[test]
    fn test_vault_name_from_url() {
        let f = files(&[("url", "https://kv-dev.vault.azure.net/\n")]);
        assert_eq!(vault_name(&f).unwrap(), "kv-dev");

        let f = files(&[("url", "kv-test.vault.azure.net:443")]);
        assert_eq!(vault_name(&f).unwrap(), "kv-test");
    }

    #[test]
    fn test_vault_name_missing() {
        let err = vault_name(&files(&[("type", AZURE_KEY_VAULT)])).unwrap_err();
        assert!(err.to_string().contains("name or url"));
        assert!(vault_name(&files(&[("url", "https:///x")])).is_err());
    }

    #[test]
    fn test_vault_url() {
        let f = files(&[("url", "https://kv-dev.vault.azure.net/\n")]);
        assert_eq!(vault_url(&f).unwrap(), "https://kv-dev.vault.azure.net");

        let f = files(&[("url", "kv-dev.vault.azure.net")]);
        assert_eq!(vault_url(&f).unwrap(), "https://kv-dev.vault.azure.net");

        let f = files(&[("name", "kv-prod")]);
        assert_eq!(vault_url(&f).unwrap(), "https://kv-prod.vault.azure.net");
    }

    #[test]
    fn test_service_principal_from_files() {
        let f = files(&[
            ("type", AZURE_KEY_VAULT),
            ("name", "kv-prod"),
            ("clientID", "app-1\n"),
            ("clientSecret", "hunter2\n"),
            ("tenantID", "tenant-1\n"),
        ]);
        assert_eq!(
            service_principal(&f).unwrap(),
            Some(ServicePrincipal {
                tenant_id: "tenant-1".into(),
                client_id: "app-1".into(),
                client_secret: "hunter2".into(),
            })
        );

        // no credentials means the az CLI login
        assert_eq!(service_principal(&files(&[("name", "kv-prod")])).unwrap(), None);
    }

    #[test]
    fn test_service_principal_incomplete() {
        let err = service_principal(&files(&[("clientID", "app-1")])).unwrap_err();
        assert!(err.to_string().contains("or neither"), "{err}");

        let err =
            service_principal(&files(&[("clientID", "app-1"), ("clientSecret", "x")])).unwrap_err();
        assert!(err.to_string().contains("tenantID"), "{err}");
    }

    #[test]
    fn test_from_config_with_credentials_needs_no_cli() {
        let f = files(&[
            ("url", "https://kv-prod.vault.azure.net/"),
            ("clientID", "app-1"),
            ("clientSecret", "hunter2"),
            ("tenantID", "tenant-1"),
        ]);
        assert!(AzureKeyVault::from_config(&f).is_ok());
    }

    #[test]
    fn test_not_found_detection() {
        let err = anyhow::anyhow!(
            "Command failed (exit status: 3): az keyvault secret show: ERROR: (SecretNotFound) A secret with (name/id) db was not found in this key vault."
        );
        assert!(is_not_found(&err));
        assert!(!is_not_found(&anyhow::anyhow!("ERROR: Please run 'az login'")));
    }
}
