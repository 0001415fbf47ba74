//! API parameters of a gateway request.
//!
//! Gateway callers address actions through parameters rather than paths:
//!
//! ```bash
//! curl -X POST http://localhost:3000/ \
//!      -d api_action=APIBox.Init \
//!      -d apisign.sign_key=s3cret \
//!      -d apiproxy.b1.gwurl=http://10.0.0.7/api
//! ```
//!
//! Parameters come from the query string and, for
//! `application/x-www-form-urlencoded` bodies, from the body. When a name
//! appears more than once the body wins over the query string and the first
//! occurrence wins within each source.

use std::collections::HashMap;

use axum::Form;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Query, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use tracing::debug;

use crate::error::Lang;

/// Parameter holding the action name.
pub const ACTION_PARAM: &str = "api_action";

/// Parameter selecting the response language.
pub const LANG_PARAM: &str = "api_lang";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Flat name/value parameters of one request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApiParams {
    params: HashMap<String, String>,
}

impl ApiParams {
    /// Decode parameters from request `parts` and an already buffered `body`.
    ///
    /// Undecodable sources are skipped, never fatal.
    pub async fn from_parts(parts: &Parts, body: &Bytes) -> Self {
        let mut params = HashMap::new();

        if is_form(&parts.headers) && !body.is_empty() {
            for (name, value) in decode_form(body).await {
                params.entry(name).or_insert(value);
            }
        }

        match Query::<Vec<(String, String)>>::try_from_uri(&parts.uri) {
            Ok(Query(pairs)) => {
                for (name, value) in pairs {
                    params.entry(name).or_insert(value);
                }
            }
            Err(e) => debug!(error = %e, "Undecodable query string, ignoring"),
        }

        Self { params }
    }

    /// The requested action, if any.
    pub fn action(&self) -> Option<&str> {
        self.get(ACTION_PARAM)
    }

    /// The requested response language, if present and supported.
    pub fn lang(&self) -> Option<Lang> {
        self.get(LANG_PARAM)?.parse().ok()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ApiParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE))
}

async fn decode_form(body: &Bytes) -> Vec<(String, String)> {
    let request = Request::builder()
        .method(Method::POST)
        .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
        .body(Body::from(body.clone()));

    let request = match request {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Failed to rebuild form request, ignoring body");
            return Vec::new();
        }
    };

    match Form::<Vec<(String, String)>>::from_request(request, &()).await {
        Ok(Form(pairs)) => pairs,
        Err(e) => {
            debug!(error = %e, "Undecodable form body, ignoring");
            Vec::new()
        }
    }
}
