//! Routing of initialization parameters onto the configured middlewares.
//!
//! Parameters arrive as a flat map of dotted names:
//!
//! ```text
//! apisign.sign_key=abc                 → SignValidator, setting "sign_key"
//! apiproxy.b1.gwurl=http://x           → ProxyClient "b1", setting "gwurl"
//! apiproxy.b1.default_params.lang=en   → ProxyClient "b1", default param "lang"
//! foo.bar=z, noDot=y                   → dropped
//! ```
//!
//! Recognized settings are listed in the setter tables below. Anything else
//! is dropped without error: initialization never fails because of an
//! unknown alias, an unknown setting or a malformed value.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::targets::{APIPROXY, APISIGN, ProxyClient, ProxyRegistry, SignValidator};

/// Settings for the signing validator, keyed by setting name.
pub type SignParams = HashMap<String, String>;

/// Settings for proxy clients, keyed by backend alias then setting name.
pub type ProxyParams = HashMap<String, HashMap<String, String>>;

/// Initialization parameters partitioned by target middleware.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoutedSettings {
    pub sign: SignParams,
    pub proxy: ProxyParams,
}

impl RoutedSettings {
    pub fn is_empty(&self) -> bool {
        self.sign.is_empty() && self.proxy.is_empty()
    }

    /// Number of proxy settings across all aliases.
    pub fn proxy_len(&self) -> usize {
        self.proxy.values().map(HashMap::len).sum()
    }
}

/// Counts of settings that changed something and settings that were dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub ignored: usize,
}

/// Partition flat dotted parameters into per-middleware settings.
///
/// Each name is split once on its first `.`. The first segment selects the
/// middleware. For `apisign` the remainder is the setting name, unsplit. For
/// `apiproxy` the remainder is split once more into backend alias and setting
/// name. Names without the required dots, or aimed at any other middleware,
/// are dropped.
pub fn route_params(params: &HashMap<String, String>) -> RoutedSettings {
    let mut routed = RoutedSettings::default();

    for (key, value) in params {
        let Some((target, rest)) = key.split_once('.') else {
            continue;
        };

        match target {
            APISIGN => {
                routed.sign.insert(rest.to_string(), value.clone());
            }
            APIPROXY => {
                let Some((alias, setting)) = rest.split_once('.') else {
                    debug!(key = %key, "Proxy setting without backend alias, ignoring");
                    continue;
                };
                routed
                    .proxy
                    .entry(alias.to_string())
                    .or_default()
                    .insert(setting.to_string(), value.clone());
            }
            _ => debug!(key = %key, "Parameter for unknown middleware, ignoring"),
        }
    }

    routed
}

// =============================================================================
// Setter tables
// =============================================================================

type SignSetter = fn(&SignValidator, &str);
type ProxySetter = fn(&mut ProxyClient, &str);
type ProxyParamSetter = fn(&mut ProxyClient, &str, &str);

/// Settings understood by the signing validator.
const SIGN_SETTERS: &[(&str, SignSetter)] = &[
    ("sign_key", set_sign_key),
    ("disabled", set_sign_disabled),
];

/// Plain settings understood by a proxy client.
const PROXY_SETTERS: &[(&str, ProxySetter)] = &[
    ("gwurl", set_gw_url),
    ("gwaddr", set_gw_addr),
    ("appid", set_app_id),
    ("sign_key", set_client_sign_key),
    ("nonce_enabled", set_nonce_enabled),
    ("nonce_length", set_nonce_length),
];

/// Named parameter maps of a proxy client, addressed as `<map>.<name>`.
const PROXY_PARAM_SETTERS: &[(&str, ProxyParamSetter)] = &[
    ("default_params", ProxyClient::set_default_param),
    ("override_params", ProxyClient::set_override_param),
];

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(setting, _)| *setting == name)
        .map(|(_, setter)| *setter)
}

fn set_sign_key(sign: &SignValidator, value: &str) {
    sign.set_sign_key(value);
}

// Only the exact value "N" enables; everything else disables.
fn set_sign_disabled(sign: &SignValidator, value: &str) {
    if value == "N" {
        sign.enable();
    } else {
        sign.disable();
    }
}

fn set_gw_url(client: &mut ProxyClient, value: &str) {
    value.clone_into(&mut client.gw_url);
}

fn set_gw_addr(client: &mut ProxyClient, value: &str) {
    value.clone_into(&mut client.gw_addr);
}

fn set_app_id(client: &mut ProxyClient, value: &str) {
    value.clone_into(&mut client.app_id);
}

fn set_client_sign_key(client: &mut ProxyClient, value: &str) {
    value.clone_into(&mut client.sign_key);
}

// Only the exact value "Y" enables.
fn set_nonce_enabled(client: &mut ProxyClient, value: &str) {
    client.nonce_enabled = value == "Y";
}

/// An unparsable value keeps the current length instead of resetting it to 0.
fn set_nonce_length(client: &mut ProxyClient, value: &str) {
    match value.parse() {
        Ok(length) => client.nonce_length = length,
        Err(e) => warn!(
            value,
            error = %e,
            "Invalid nonce_length, keeping current value"
        ),
    }
}

// =============================================================================
// Application
// =============================================================================

/// Apply signing settings onto `sign`.
pub fn apply_sign_settings(sign: &SignValidator, params: &SignParams) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (name, value) in params {
        match lookup(SIGN_SETTERS, name) {
            Some(setter) => {
                setter(sign, value);
                report.applied += 1;
            }
            None => {
                debug!(setting = %name, "Unknown apisign setting, ignoring");
                report.ignored += 1;
            }
        }
    }

    report
}

/// Apply proxy settings onto the clients of `proxy`.
///
/// Settings for an alias the proxy does not know are skipped as a block.
pub fn apply_proxy_settings(proxy: &ProxyRegistry, params: &ProxyParams) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (alias, settings) in params {
        let outcome = proxy.update_client(alias, |client| apply_client_settings(client, settings));
        match outcome {
            Some(client_report) => {
                report.applied += client_report.applied;
                report.ignored += client_report.ignored;
            }
            None => {
                debug!(alias = %alias, settings = settings.len(), "Unknown proxy backend, ignoring");
                report.ignored += settings.len();
            }
        }
    }

    report
}

fn apply_client_settings(client: &mut ProxyClient, settings: &HashMap<String, String>) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (name, value) in settings {
        if let Some(setter) = lookup(PROXY_SETTERS, name) {
            setter(client, value);
            report.applied += 1;
            continue;
        }

        let param_setter = name
            .split_once('.')
            .and_then(|(map, param)| Some((lookup(PROXY_PARAM_SETTERS, map)?, param)));
        match param_setter {
            Some((setter, param)) => {
                setter(client, param, value);
                report.applied += 1;
            }
            None => {
                debug!(setting = %name, "Unknown apiproxy setting, ignoring");
                report.ignored += 1;
            }
        }
    }

    report
}
