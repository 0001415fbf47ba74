use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Settings of one backend client of the reverse proxy.
///
/// `sign_key` is never serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProxyClient {
    /// Gateway URL requests are forwarded to
    pub gw_url: String,
    /// Network address overriding the host in `gw_url`
    pub gw_addr: String,
    pub app_id: String,
    #[serde(skip)]
    pub sign_key: String,
    pub nonce_enabled: bool,
    pub nonce_length: i64,
    /// Parameters added to forwarded requests when absent
    pub default_params: BTreeMap<String, String>,
    /// Parameters forced onto forwarded requests
    pub override_params: BTreeMap<String, String>,
}

impl ProxyClient {
    pub fn set_default_param(&mut self, name: &str, value: &str) {
        self.default_params
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_override_param(&mut self, name: &str, value: &str) {
        self.override_params
            .insert(name.to_string(), value.to_string());
    }

    pub fn has_sign_key(&self) -> bool {
        !self.sign_key.is_empty()
    }
}

/// Backend clients of the reverse proxy, addressed by alias.
///
/// The alias set is fixed at construction. Client settings are mutable
/// through `&self`.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    clients: HashMap<String, Mutex<ProxyClient>>,
}

impl ProxyRegistry {
    pub fn new<I, S>(clients: I) -> Self
    where
        I: IntoIterator<Item = (S, ProxyClient)>,
        S: Into<String>,
    {
        Self {
            clients: clients
                .into_iter()
                .map(|(alias, client)| (alias.into(), Mutex::new(client)))
                .collect(),
        }
    }

    /// One default-initialized client per alias.
    pub fn with_aliases<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(aliases.into_iter().map(|a| (a, ProxyClient::default())))
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.clients.contains_key(alias)
    }

    /// Run `f` against the client registered under `alias`.
    ///
    /// Returns `None` without calling `f` when the alias is unknown.
    pub fn update_client<R>(&self, alias: &str, f: impl FnOnce(&mut ProxyClient) -> R) -> Option<R> {
        let client = self.clients.get(alias)?;
        let mut guard = client.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut guard))
    }

    /// Snapshot of the client registered under `alias`.
    pub fn client(&self, alias: &str) -> Option<ProxyClient> {
        self.update_client(alias, |c| c.clone())
    }

    /// Snapshot of every client, ordered by alias.
    pub fn snapshot(&self) -> BTreeMap<String, ProxyClient> {
        self.clients
            .iter()
            .map(|(alias, client)| {
                let client = client.lock().unwrap_or_else(PoisonError::into_inner);
                (alias.clone(), client.clone())
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_update_known_alias() {
        let registry = ProxyRegistry::with_aliases(["b1"]);

        let updated = registry.update_client("b1", |c| c.app_id = "app-1".to_string());
        assert!(updated.is_some());
        assert_eq!(registry.client("b1").unwrap().app_id, "app-1");
    }

    #[test]
    fn test_update_unknown_alias() {
        let registry = ProxyRegistry::with_aliases(["b1"]);
        let mut called = false;

        let updated = registry.update_client("ghost", |_| called = true);
        assert!(updated.is_none());
        assert!(!called);
    }

    #[test]
    fn test_params() {
        let mut client = ProxyClient::default();
        client.set_default_param("lang", "en");
        client.set_override_param("tenant", "acme");
        client.set_default_param("lang", "zh");

        assert_eq!(client.default_params.get("lang").unwrap(), "zh");
        assert_eq!(client.override_params.get("tenant").unwrap(), "acme");
    }

    #[test]
    fn test_sign_key_not_serialized() {
        let client = ProxyClient {
            sign_key: "hidden".to_string(),
            ..ProxyClient::default()
        };
        let json = serde_json::to_string(&client).unwrap();
        assert!(!json.contains("hidden"));
        assert!(!json.contains("sign_key"));
    }
}
