//! Per-session form state
//!
//! Tracks which integration and endpoint are selected and the values the
//! user has typed so far.

use serde::Serialize;

use super::ParamValues;
use crate::catalog::IntegrationDescriptor;
use crate::{Error, Result};

/// Current selection and parameter values of one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormState {
    integration: Option<String>,
    endpoint: Option<String>,
    values: ParamValues,
}

impl FormState {
    /// Empty form
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selected integration key
    #[must_use]
    pub fn integration(&self) -> Option<&str> {
        self.integration.as_deref()
    }

    /// Selected endpoint id
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Current values
    #[must_use]
    pub fn values(&self) -> &ParamValues {
        &self.values
    }

    /// Select an integration; switching integrations clears everything
    pub fn select_integration(&mut self, integration: &IntegrationDescriptor) {
        if self.integration.as_deref() != Some(integration.key.as_str()) {
            self.integration = Some(integration.key.clone());
            self.endpoint = None;
            self.values.clear();
        }
    }

    /// Select an endpoint of `integration`
    ///
    /// Only the integration's sticky fields keep their values; the endpoint's
    /// parameter defaults are pre-filled where no value remains.
    pub fn select_endpoint(
        &mut self,
        integration: &IntegrationDescriptor,
        endpoint_id: &str,
    ) -> Result<()> {
        let endpoint = integration.endpoint(endpoint_id).ok_or_else(|| {
            Error::NotFound(format!("endpoint '{}/{endpoint_id}'", integration.key))
        })?;

        self.select_integration(integration);
        if self.endpoint.as_deref() == Some(endpoint_id) {
            return Ok(());
        }

        self.values.retain(|name, _| integration.is_sticky(name));
        for param in &endpoint.parameters {
            if let Some(default) = &param.default {
                self.values
                    .entry(param.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        self.endpoint = Some(endpoint_id.to_string());
        Ok(())
    }

    /// Set one value
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Values for one submission to the selected endpoint
    ///
    /// `submitted` is laid over the form's current values (sticky fields and
    /// defaults). Only sticky fields are written back, so a value left out of
    /// a later submission is not resent.
    pub fn submission(
        &mut self,
        integration: &IntegrationDescriptor,
        submitted: ParamValues,
    ) -> ParamValues {
        for (name, value) in &submitted {
            if integration.is_sticky(name) {
                self.values.insert(name.clone(), value.clone());
            }
        }

        let mut values = self.values.clone();
        values.extend(submitted);
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_catalog;

    fn catalog() -> Vec<IntegrationDescriptor> {
        parse_catalog(
            r"
integrations:
  - key: docusign
    base_url: https://demo.docusign.net/restapi
    additional_config:
      base_uri:
        label: Base URI
    sticky_fields: [base_uri]
    endpoints:
      - id: list_envelopes
        method: GET
        path: /envelopes
        parameters:
          - name: status
            type: select
            options: [sent, completed]
            default: sent
      - id: get_envelope
        method: GET
        path: /envelopes/{envelope_id}
        parameters:
          - name: envelope_id
            required: true
  - key: box
    base_url: https://api.box.com/2.0
",
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_switch_keeps_sticky_values() {
        let catalog = catalog();
        let docusign = &catalog[0];
        let mut form = FormState::new();

        form.select_endpoint(docusign, "get_envelope").unwrap();
        form.set_value("base_uri", "https://na3.docusign.net");
        form.set_value("envelope_id", "env-1");

        form.select_endpoint(docusign, "list_envelopes").unwrap();
        assert_eq!(form.endpoint(), Some("list_envelopes"));
        assert_eq!(form.values().get("base_uri").map(String::as_str), Some("https://na3.docusign.net"));
        assert!(!form.values().contains_key("envelope_id"));
        // default pre-filled
        assert_eq!(form.values().get("status").map(String::as_str), Some("sent"));
    }

    #[test]
    fn test_reselecting_same_endpoint_keeps_values() {
        let catalog = catalog();
        let docusign = &catalog[0];
        let mut form = FormState::new();

        form.select_endpoint(docusign, "get_envelope").unwrap();
        form.set_value("envelope_id", "env-1");
        form.select_endpoint(docusign, "get_envelope").unwrap();
        assert_eq!(form.values().get("envelope_id").map(String::as_str), Some("env-1"));
    }

    #[test]
    fn test_integration_switch_clears_sticky_values() {
        let catalog = catalog();
        let mut form = FormState::new();

        form.select_endpoint(&catalog[0], "list_envelopes").unwrap();
        form.set_value("base_uri", "https://na3.docusign.net");

        form.select_integration(&catalog[1]);
        assert_eq!(form.integration(), Some("box"));
        assert_eq!(form.endpoint(), None);
        assert!(form.values().is_empty());
    }

    #[test]
    fn test_submission_does_not_carry_plain_values() {
        let catalog = catalog();
        let docusign = &catalog[0];
        let mut form = FormState::new();
        form.select_endpoint(docusign, "get_envelope").unwrap();

        let first: ParamValues = [
            ("envelope_id".to_string(), "env-1".to_string()),
            ("base_uri".to_string(), "https://na3.docusign.net".to_string()),
        ]
        .into();
        let values = form.submission(docusign, first);
        assert_eq!(values.len(), 2);

        form.select_endpoint(docusign, "get_envelope").unwrap();
        let values = form.submission(docusign, ParamValues::new());
        assert!(!values.contains_key("envelope_id"));
        assert_eq!(values.get("base_uri").map(String::as_str), Some("https://na3.docusign.net"));
    }

    #[test]
    fn test_submission_overrides_defaults() {
        let catalog = catalog();
        let docusign = &catalog[0];
        let mut form = FormState::new();
        form.select_endpoint(docusign, "list_envelopes").unwrap();

        let values = form.submission(docusign, [("status".to_string(), "completed".to_string())].into());
        assert_eq!(values["status"], "completed");
        // the default stays in the form for the next submission
        assert_eq!(form.values()["status"], "sent");
    }

    #[test]
    fn test_unknown_endpoint() {
        let catalog = catalog();
        let mut form = FormState::new();
        assert!(matches!(
            form.select_endpoint(&catalog[0], "nope"),
            Err(Error::NotFound(_))
        ));
    }
}
