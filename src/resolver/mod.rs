//! Request resolver
//!
//! Turns an integration descriptor, one of its endpoints, the user's flat
//! parameter map and the current auth state into a [`ResolvedRequest`].
//! Resolution is a pure, synchronous data transformation: it never talks to
//! the network and either yields a complete request or fails before anything
//! is sent.
//!
//! # Security
//!
//! Resolved URLs and headers may carry credentials. They are never logged.

mod form;

pub use form::FormState;

use std::collections::{BTreeMap, BTreeSet};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::{AuthInjection, AuthStateManager};
use crate::catalog::{EndpointDescriptor, HttpMethod, IntegrationDescriptor, placeholders, substitute};
use crate::{Error, Result};

/// Flat, string-keyed parameter input from the form
pub type ParamValues = BTreeMap<String, String>;

/// Everything outside RFC 3986 `unreserved` is escaped inside a path value
const PATH_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A fully-formed outbound request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Base URL + substituted path + query string
    pub url: String,
    /// Merged headers
    pub headers: BTreeMap<String, String>,
    /// JSON body for POST/PUT/PATCH when parameters remain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ResolvedRequest {
    /// Query string without the leading `?`
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, q)| q)
    }

    /// Case-insensitive header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Insert a header, replacing any existing entry regardless of case
fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: String) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value);
}

fn non_empty<'a>(values: &'a ParamValues, name: &str) -> Option<&'a str> {
    values
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Descriptor-driven request builder
#[derive(Debug, Clone)]
pub struct RequestResolver {
    strict_validation: bool,
}

impl Default for RequestResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestResolver {
    /// Create a resolver that validates number and select values
    #[must_use]
    pub fn new() -> Self {
        Self {
            strict_validation: true,
        }
    }

    /// Enable or disable number/select value validation
    #[must_use]
    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    /// Build the outbound request for `endpoint` of `integration`
    pub fn resolve(
        &self,
        integration: &IntegrationDescriptor,
        endpoint: &EndpointDescriptor,
        values: &ParamValues,
        auth: &AuthStateManager,
    ) -> Result<ResolvedRequest> {
        self.check_presence(integration, endpoint, values)?;
        if self.strict_validation {
            Self::check_types(endpoint, values)?;
        }

        let auth_values = auth.auth_values(&integration.key, &integration.auth);
        let lookup = |name: &str| -> Option<String> {
            non_empty(values, name)
                .or_else(|| auth_values.get(name).map(String::as_str))
                .map(str::to_string)
        };
        let encoded = |name: &str| lookup(name).map(|v| utf8_percent_encode(&v, PATH_VALUE).to_string());

        // Base URL and path substitution
        let base_template = integration
            .base_url_override
            .as_deref()
            .and_then(&lookup)
            .unwrap_or_else(|| integration.base_url.clone());
        let base = substitute(&base_template, &encoded).map_err(Error::UnresolvedPlaceholder)?;
        let path = substitute(&endpoint.path, &encoded).map_err(Error::UnresolvedPlaceholder)?;

        let mut consumed: BTreeSet<&str> = placeholders(&base_template)
            .chain(placeholders(&endpoint.path))
            .collect();
        for rule in &integration.injections {
            consumed.insert(rule.source.as_str());
        }
        if let Some(source) = &integration.base_url_override {
            consumed.insert(source.as_str());
        }

        // Partition leftover values: declared parameters first, then extras
        let mut leftover: Vec<(String, String)> = Vec::new();
        for param in &endpoint.parameters {
            if consumed.contains(param.name.as_str()) {
                continue;
            }
            if let Some(value) = non_empty(values, &param.name) {
                leftover.push((param.name.clone(), value.to_string()));
            }
        }
        for (name, value) in values {
            if consumed.contains(name.as_str())
                || endpoint.parameter(name).is_some()
                || integration.is_config_field(name)
                || value.trim().is_empty()
            {
                continue;
            }
            leftover.push((name.clone(), value.clone()));
        }

        let (mut query, body) = if endpoint.method.has_body() {
            let body = (!leftover.is_empty()).then(|| {
                Value::Object(
                    leftover
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect::<Map<String, Value>>(),
                )
            });
            (Vec::new(), body)
        } else {
            (leftover, None)
        };

        // Headers: defaults, then auth, then declared injections
        let mut headers = BTreeMap::new();
        for (name, value) in &integration.default_headers {
            set_header(&mut headers, name, value.clone());
        }

        let mut auth_query = None;
        match auth.get_auth_header(&integration.key, &integration.auth) {
            Some(AuthInjection::Header { name, value }) => set_header(&mut headers, &name, value),
            Some(AuthInjection::Query { name, value }) => auth_query = Some((name, value)),
            None if integration.auth.requires_credentials() => {
                return Err(Error::AuthRequired(integration.key.clone()));
            }
            None => {}
        }

        for rule in &integration.injections {
            let Some(value) = lookup(&rule.source) else {
                continue;
            };
            if let Some(header) = &rule.header {
                set_header(&mut headers, header, value.clone());
            }
            if let Some(param) = &rule.query_param {
                if !query.iter().any(|(k, _)| k == param) {
                    query.push((param.clone(), value));
                }
            }
        }

        if let Some((name, value)) = auth_query {
            if !query.iter().any(|(k, _)| *k == name) {
                query.push((name, value));
            }
        }

        // Assemble
        let mut url = join_url(&base, &path);
        if !query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            url.push('?');
            url.push_str(&encoded);
        }

        debug!(
            integration = %integration.key,
            endpoint = %endpoint.id,
            method = %endpoint.method,
            headers = headers.len(),
            has_body = body.is_some(),
            "Resolved request"
        );

        Ok(ResolvedRequest {
            method: endpoint.method,
            url,
            headers,
            body,
        })
    }

    fn check_presence(
        &self,
        integration: &IntegrationDescriptor,
        endpoint: &EndpointDescriptor,
        values: &ParamValues,
    ) -> Result<()> {
        let missing_param = endpoint
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str());
        let missing_config = integration
            .additional_config
            .iter()
            .filter(|(_, field)| field.required)
            .map(|(name, _)| name.as_str());

        for name in missing_param.chain(missing_config) {
            if non_empty(values, name).is_none() {
                return Err(Error::MissingParameter(name.to_string()));
            }
        }
        Ok(())
    }

    fn check_types(endpoint: &EndpointDescriptor, values: &ParamValues) -> Result<()> {
        for param in &endpoint.parameters {
            if let Some(value) = non_empty(values, &param.name) {
                param
                    .param_type
                    .check(value)
                    .map_err(|reason| Error::invalid_parameter(&param.name, reason))?;
            }
        }
        Ok(())
    }
}

/// Concatenate base and path without doubling the separator
fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        _ => format!("{base}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenDelivery;
    use crate::catalog::parse_catalog;
    use pretty_assertions::assert_eq;

    fn integration(yaml: &str) -> IntegrationDescriptor {
        parse_catalog(yaml).unwrap().remove(0)
    }

    fn values(pairs: &[(&str, &str)]) -> ParamValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    const FILES: &str = r"
key: files
base_url: https://api.example.com/v1
endpoints:
  - id: get_file
    method: GET
    path: /files/{fileId}
    parameters:
      - name: fileId
        required: true
      - name: note
  - id: update_item
    method: POST
    path: /items/{id}
    parameters:
      - name: id
        required: true
      - name: name
  - id: list
    method: GET
    path: /files
    parameters:
      - name: limit
        type: number
      - name: order
        type: select
        options: [asc, desc]
";

    fn resolve(yaml: &str, endpoint: &str, input: &[(&str, &str)]) -> Result<ResolvedRequest> {
        let integration = integration(yaml);
        let endpoint = integration.endpoint(endpoint).unwrap().clone();
        RequestResolver::new().resolve(&integration, &endpoint, &values(input), &AuthStateManager::new())
    }

    #[test]
    fn test_path_values_excluded_from_query() {
        let req = resolve(FILES, "get_file", &[("fileId", "42"), ("note", "x")]).unwrap();
        assert_eq!(req.url, "https://api.example.com/v1/files/42?note=x");
        assert_eq!(req.body, None);
    }

    #[test]
    fn test_post_body_excludes_path_values() {
        let req = resolve(FILES, "update_item", &[("id", "5"), ("name", "foo")]).unwrap();
        assert_eq!(req.url, "https://api.example.com/v1/items/5");
        assert_eq!(req.query(), None);
        assert_eq!(
            serde_json::to_string(req.body.as_ref().unwrap()).unwrap(),
            r#"{"name":"foo"}"#
        );
    }

    #[test]
    fn test_post_without_leftovers_has_no_body() {
        let req = resolve(FILES, "update_item", &[("id", "5"), ("name", "")]).unwrap();
        assert_eq!(req.body, None);
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = resolve(FILES, "get_file", &[("note", "x")]).unwrap_err();
        assert!(matches!(err, Error::MissingParameter(ref n) if n == "fileId"));

        let err = resolve(FILES, "get_file", &[("fileId", "   ")]).unwrap_err();
        assert!(matches!(err, Error::MissingParameter(ref n) if n == "fileId"));
    }

    #[test]
    fn test_path_values_are_percent_encoded() {
        let req = resolve(FILES, "get_file", &[("fileId", "a b/c")]).unwrap();
        assert_eq!(req.url, "https://api.example.com/v1/files/a%20b%2Fc");
    }

    #[test]
    fn test_number_and_select_validation() {
        let err = resolve(FILES, "list", &[("limit", "ten")]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "limit"));

        let err = resolve(FILES, "list", &[("order", "sideways")]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "order"));

        // not coerced: the literal string travels
        let req = resolve(FILES, "list", &[("limit", "010"), ("order", "asc")]).unwrap();
        assert_eq!(req.query(), Some("limit=010&order=asc"));
    }

    #[test]
    fn test_lenient_mode_skips_type_checks() {
        let integration = integration(FILES);
        let endpoint = integration.endpoint("list").unwrap();
        let req = RequestResolver::new()
            .with_strict_validation(false)
            .resolve(
                &integration,
                endpoint,
                &values(&[("order", "sideways")]),
                &AuthStateManager::new(),
            )
            .unwrap();
        assert_eq!(req.query(), Some("order=sideways"));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let input = [("fileId", "42"), ("note", "x"), ("zeta", "1"), ("alpha", "2")];
        let first = resolve(FILES, "get_file", &input).unwrap();
        let second = resolve(FILES, "get_file", &input).unwrap();
        assert_eq!(first, second);
        // undeclared extras follow declared parameters in name order
        assert_eq!(first.query(), Some("note=x&alpha=2&zeta=1"));
    }

    const SECURED: &str = r#"
key: secured
base_url: https://api.example.com
default_headers:
  Accept: application/json
auth:
  type: api_key
  header: X-Token
  prefix: "Bearer "
endpoints:
  - id: me
    method: GET
    path: /me
"#;

    #[test]
    fn test_auth_required_when_credentials_absent() {
        let err = resolve(SECURED, "me", &[]).unwrap_err();
        assert!(matches!(err, Error::AuthRequired(ref k) if k == "secured"));
    }

    #[test]
    fn test_api_key_header_merged_with_defaults() {
        let integration = integration(SECURED);
        let auth = AuthStateManager::new();
        auth.set_credential("secured", values(&[("api_key", "abc")]));

        let req = RequestResolver::new()
            .resolve(&integration, integration.endpoint("me").unwrap(), &ParamValues::new(), &auth)
            .unwrap();
        assert_eq!(req.header("X-Token"), Some("Bearer abc"));
        assert_eq!(req.header("accept"), Some("application/json"));
    }

    const DOCUSIGN: &str = r"
key: docusign
base_url: https://demo.docusign.net/restapi/v2.1
auth:
  type: oauth
additional_config:
  account_id:
    label: Account ID
    required: true
  base_uri:
    label: Base URI
injections:
  - source: base_uri
    query_param: base_uri
    header: X-DocuSign-Base-URI
endpoints:
  - id: list_envelopes
    method: GET
    path: /accounts/{account_id}/envelopes
    parameters:
      - name: from_date
";

    #[test]
    fn test_injection_rule_echoes_query_and_header() {
        let integration = integration(DOCUSIGN);
        let auth = AuthStateManager::new();
        auth.begin_oauth("docusign").unwrap();
        auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap();

        let input = values(&[
            ("account_id", "acc-1"),
            ("base_uri", "https://na3.docusign.net"),
            ("from_date", "2024-01-01"),
        ]);
        let req = RequestResolver::new()
            .resolve(&integration, integration.endpoint("list_envelopes").unwrap(), &input, &auth)
            .unwrap();

        assert_eq!(
            req.url,
            "https://demo.docusign.net/restapi/v2.1/accounts/acc-1/envelopes?from_date=2024-01-01&base_uri=https%3A%2F%2Fna3.docusign.net"
        );
        assert_eq!(req.header("X-DocuSign-Base-URI"), Some("https://na3.docusign.net"));
        assert_eq!(req.header("Authorization"), Some("Bearer tok"));
    }

    #[test]
    fn test_required_config_field_checked() {
        let integration = integration(DOCUSIGN);
        let auth = AuthStateManager::new();
        let err = RequestResolver::new()
            .resolve(
                &integration,
                integration.endpoint("list_envelopes").unwrap(),
                &ParamValues::new(),
                &auth,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MissingParameter(ref n) if n == "account_id"));
    }

    const SALESFORCE: &str = r"
key: salesforce
base_url: https://login.salesforce.com
base_url_override: instance_url
auth:
  type: oauth
endpoints:
  - id: query
    method: GET
    path: /services/data/v59.0/query
    parameters:
      - name: q
        required: true
";

    #[test]
    fn test_base_url_override_from_token() {
        let integration = integration(SALESFORCE);
        let auth = AuthStateManager::new();
        auth.begin_oauth("salesforce").unwrap();
        auth.complete_oauth(TokenDelivery {
            instance_url: Some("https://na1.salesforce.com/".into()),
            ..TokenDelivery::access_token("tok")
        })
        .unwrap();

        let req = RequestResolver::new()
            .resolve(
                &integration,
                integration.endpoint("query").unwrap(),
                &values(&[("q", "SELECT Id FROM Account")]),
                &auth,
            )
            .unwrap();
        assert_eq!(
            req.url,
            "https://na1.salesforce.com/services/data/v59.0/query?q=SELECT+Id+FROM+Account"
        );
    }

    const ZENDESK: &str = r"
key: zendesk
base_url: https://{subdomain}.zendesk.com/api/v2
auth:
  type: oauth
  token_placement:
    in: query
    param: access_token
endpoints:
  - id: list_tickets
    method: GET
    path: /tickets
";

    #[test]
    fn test_subdomain_from_token_and_token_in_query() {
        let integration = integration(ZENDESK);
        let auth = AuthStateManager::new();
        auth.begin_oauth("zendesk").unwrap();
        auth.complete_oauth(TokenDelivery {
            subdomain: Some("acme".into()),
            ..TokenDelivery::access_token("tok")
        })
        .unwrap();

        let req = RequestResolver::new()
            .resolve(&integration, integration.endpoint("list_tickets").unwrap(), &ParamValues::new(), &auth)
            .unwrap();
        assert_eq!(req.url, "https://acme.zendesk.com/api/v2/tickets?access_token=tok");
        assert_eq!(req.header("Authorization"), None);
    }

    #[test]
    fn test_unresolved_placeholder() {
        let integration = integration(ZENDESK);
        let auth = AuthStateManager::new();
        auth.begin_oauth("zendesk").unwrap();
        auth.complete_oauth(TokenDelivery::access_token("tok")).unwrap();

        let err = RequestResolver::new()
            .resolve(&integration, integration.endpoint("list_tickets").unwrap(), &ParamValues::new(), &auth)
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedPlaceholder(ref n) if n == "subdomain"));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.com/", "/x"), "https://a.com/x");
        assert_eq!(join_url("https://a.com", "/x"), "https://a.com/x");
        assert_eq!(join_url("https://a.com", ""), "https://a.com");
    }
}
