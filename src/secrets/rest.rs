//! Key Vault REST client authenticated as a service principal

use anyhow::{Context, Result};
use serde::Deserialize;
use std::cell::RefCell;

const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const VAULT_SCOPE: &str = "https://vault.azure.net/.default";
const API_VERSION: &str = "7.4";

/// Client credentials of an Azure AD application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

/// Reads secrets over HTTPS with a client-credentials token
///
/// The token is requested on first use and kept for the rest of the run.
pub struct KeyVaultClient {
    agent: ureq::Agent,
    login_base: String,
    vault_url: String,
    credentials: ServicePrincipal,
    token: RefCell<Option<String>>,
}

impl KeyVaultClient {
    pub fn new(vault_url: impl Into<String>, credentials: ServicePrincipal) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            login_base: LOGIN_BASE.to_string(),
            vault_url: vault_url.into(),
            credentials,
            token: RefCell::new(None),
        }
    }

    /// Client talking to a local server for both login and vault calls
    #[cfg(test)]
    fn local(base: &str, credentials: ServicePrincipal) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder().proxy(None).build().into();
        Self {
            agent,
            login_base: base.to_string(),
            ..Self::new(base, credentials)
        }
    }

    fn token(&self) -> Result<String> {
        if let Some(token) = self.token.borrow().as_ref() {
            return Ok(token.clone());
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base, self.credentials.tenant_id
        );
        let response: TokenResponse = self
            .agent
            .post(&url)
            .send_form([
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", VAULT_SCOPE),
            ])
            .with_context(|| format!("token request for client {}", self.credentials.client_id))?
            .body_mut()
            .read_json()
            .context("parse token response")?;

        log::debug!("vault: token acquired for client {}", self.credentials.client_id);
        *self.token.borrow_mut() = Some(response.access_token.clone());
        Ok(response.access_token)
    }

    /// Current value of secret `key`, `None` if the vault has no such secret
    pub fn secret(&self, key: &str) -> Result<Option<String>> {
        let token = self.token()?;
        let url = format!("{}/secrets/{key}?api-version={API_VERSION}", self.vault_url);
        match self
            .agent
            .get(&url)
            .header("Authorization", format!("Bearer {token}"))
            .call()
        {
            Ok(mut response) => {
                let bundle: SecretBundle = response
                    .body_mut()
                    .read_json()
                    .with_context(|| format!("parse secret {key}"))?;
                Ok(Some(bundle.value))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("get secret {key}")),
        }
    }
}
