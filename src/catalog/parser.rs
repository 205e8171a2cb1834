//! YAML catalog parser and invariant checks

use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;

use super::definition::{AuthScheme, IntegrationDescriptor, TokenPlacement, placeholders};
use crate::{Error, Result};

/// A catalog document holding several integrations
#[derive(Debug, Deserialize)]
struct CatalogDocument {
    integrations: Vec<IntegrationDescriptor>,
}

/// Parse integrations from YAML content
///
/// A document is either a single integration mapping or a mapping with an
/// `integrations` list. Declaration order is preserved.
pub fn parse_catalog(content: &str) -> Result<Vec<IntegrationDescriptor>> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|e| Error::Config(format!("Failed to parse catalog YAML: {e}")))?;

    if value.get("integrations").is_some() {
        let doc: CatalogDocument = serde_yaml::from_value(value)
            .map_err(|e| Error::Config(format!("Invalid catalog document: {e}")))?;
        Ok(doc.integrations)
    } else {
        let integration: IntegrationDescriptor = serde_yaml::from_value(value)
            .map_err(|e| Error::Config(format!("Invalid integration definition: {e}")))?;
        Ok(vec![integration])
    }
}

/// Parse integrations from a file
pub async fn parse_catalog_file(path: &std::path::Path) -> Result<Vec<IntegrationDescriptor>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("Failed to read catalog file {path:?}: {e}")))?;

    parse_catalog(&content).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Validate a whole catalog: unique keys plus per-integration invariants
pub fn validate_catalog(integrations: &[IntegrationDescriptor]) -> Result<()> {
    let mut keys = HashSet::new();
    for integration in integrations {
        if !keys.insert(integration.key.as_str()) {
            return Err(Error::Config(format!(
                "Duplicate integration key '{}'",
                integration.key
            )));
        }
        validate_integration(integration)?;
    }
    Ok(())
}

/// Validate one integration descriptor
pub fn validate_integration(integration: &IntegrationDescriptor) -> Result<()> {
    let key = &integration.key;

    if key.is_empty() {
        return Err(Error::Config("Integration key is required".to_string()));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Config(format!(
            "Integration key '{key}' must contain only alphanumeric characters, '-' and '_'"
        )));
    }

    if integration.base_url.trim().is_empty() {
        return Err(Error::Config(format!(
            "Integration '{key}' must declare a base_url"
        )));
    }

    validate_auth(integration)?;

    let auth_values = integration.auth.auth_value_names();
    let integration_wide = |name: &str| {
        integration.is_config_field(name) || auth_values.contains(name)
    };

    for name in placeholders(&integration.base_url) {
        if !integration_wide(name) {
            return Err(Error::Config(format!(
                "Integration '{key}': base_url placeholder {{{name}}} is neither a config field nor an auth value"
            )));
        }
    }

    let mut endpoint_ids = HashSet::new();
    let mut all_params = BTreeSet::new();

    for endpoint in &integration.endpoints {
        if endpoint.id.is_empty() {
            return Err(Error::Config(format!(
                "Integration '{key}' has an endpoint without an id"
            )));
        }
        if !endpoint_ids.insert(endpoint.id.as_str()) {
            return Err(Error::Config(format!(
                "Integration '{key}': duplicate endpoint id '{}'",
                endpoint.id
            )));
        }

        let mut names = HashSet::new();
        for param in &endpoint.parameters {
            if !names.insert(param.name.as_str()) {
                return Err(Error::Config(format!(
                    "Endpoint '{key}/{}': duplicate parameter '{}'",
                    endpoint.id, param.name
                )));
            }
            if let Some(default) = &param.default {
                param.param_type.check(default).map_err(|reason| {
                    Error::Config(format!(
                        "Endpoint '{key}/{}': default of '{}' is invalid: {reason}",
                        endpoint.id, param.name
                    ))
                })?;
            }
            all_params.insert(param.name.as_str());
        }

        for name in placeholders(&endpoint.path) {
            if !names.contains(name) && !integration_wide(name) {
                return Err(Error::Config(format!(
                    "Endpoint '{key}/{}': placeholder {{{name}}} has no matching parameter",
                    endpoint.id
                )));
            }
        }
    }

    let known = |name: &str| integration_wide(name) || all_params.contains(name);

    for rule in &integration.injections {
        if !known(&rule.source) {
            return Err(Error::Config(format!(
                "Integration '{key}': injection source '{}' is not a known field",
                rule.source
            )));
        }
        if rule.query_param.is_none() && rule.header.is_none() {
            return Err(Error::Config(format!(
                "Integration '{key}': injection of '{}' has no target",
                rule.source
            )));
        }
    }

    for field in &integration.sticky_fields {
        if !known(field) {
            return Err(Error::Config(format!(
                "Integration '{key}': sticky field '{field}' is not a known field"
            )));
        }
    }

    if let Some(source) = &integration.base_url_override {
        if !integration_wide(source) {
            return Err(Error::Config(format!(
                "Integration '{key}': base_url_override '{source}' is neither a config field nor an auth value"
            )));
        }
    }

    validate_no_secrets(integration)?;

    Ok(())
}

fn validate_auth(integration: &IntegrationDescriptor) -> Result<()> {
    match &integration.auth {
        AuthScheme::ApiKey { header, .. } if header.trim().is_empty() => Err(Error::Config(
            format!("Integration '{}': api_key auth needs a header", integration.key),
        )),
        AuthScheme::OAuth {
            token_placement: TokenPlacement::Query { param },
            ..
        } if param.trim().is_empty() => Err(Error::Config(format!(
            "Integration '{}': query token placement needs a parameter name",
            integration.key
        ))),
        _ => Ok(()),
    }
}

/// Credentials belong to the auth state, never to static default headers
fn validate_no_secrets(integration: &IntegrationDescriptor) -> Result<()> {
    let auth_header = match &integration.auth {
        AuthScheme::ApiKey { header, .. } => header.as_str(),
        _ => "Authorization",
    };

    for name in integration.default_headers.keys() {
        if name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case(auth_header) {
            return Err(Error::Config(format!(
                "Integration '{}': default header '{name}' would carry a credential; use the auth scheme instead",
                integration.key
            )));
        }
    }

    Ok(())
}
