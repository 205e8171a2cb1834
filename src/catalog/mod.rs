//! Integration catalog
//!
//! A purely declarative, ordered set of integration descriptors loaded once
//! from YAML at startup. Adding a provider means adding catalog data; the
//! resolver never needs new code for it.
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  YAML catalog    │────▶│ Integration /   │────▶│    Resolver     │
//! │  (meraki.yaml)   │     │ Endpoint descr. │     │ (ResolvedReq.)  │
//! └──────────────────┘     └─────────────────┘     └─────────────────┘
//!                                                          ▲
//!                                                          │
//!                                                  ┌─────────────────┐
//!                                                  │   Auth state    │
//!                                                  └─────────────────┘
//! ```

mod definition;
mod loader;
mod parser;

pub use definition::*;
pub use loader::CatalogLoader;
pub use parser::{parse_catalog, parse_catalog_file, validate_catalog, validate_integration};

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::{Error, Result};

/// Selector entry for one integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationSummary {
    /// Catalog key
    pub key: String,
    /// Display name
    pub name: String,
    /// Auth scheme label
    pub auth: &'static str,
    /// Number of declared endpoints
    pub endpoints: usize,
}

/// Immutable, ordered collection of integrations
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    integrations: Vec<IntegrationDescriptor>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, checking every descriptor invariant
    pub fn new(integrations: Vec<IntegrationDescriptor>) -> Result<Self> {
        validate_catalog(&integrations)?;

        let index = integrations
            .iter()
            .enumerate()
            .map(|(i, integration)| (integration.key.clone(), i))
            .collect();

        Ok(Self {
            integrations,
            index,
        })
    }

    /// Load and validate a catalog from a YAML file or directory
    pub async fn load(path: &Path) -> Result<Self> {
        let integrations = CatalogLoader::load_path(path).await?;
        Self::new(integrations)
    }

    /// Load and validate a catalog from several paths, in order
    pub async fn load_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut integrations = Vec::new();
        for path in paths {
            integrations.extend(CatalogLoader::load_path(path.as_ref()).await?);
        }
        Self::new(integrations)
    }

    /// Integrations in declaration order, for populating a selector
    #[must_use]
    pub fn list_integrations(&self) -> Vec<IntegrationSummary> {
        self.integrations
            .iter()
            .map(|i| IntegrationSummary {
                key: i.key.clone(),
                name: i.display_name().to_string(),
                auth: i.auth.label(),
                endpoints: i.endpoints.len(),
            })
            .collect()
    }

    /// Look up an integration by key
    pub fn get_integration(&self, key: &str) -> Result<&IntegrationDescriptor> {
        self.index
            .get(key)
            .map(|&i| &self.integrations[i])
            .ok_or_else(|| Error::NotFound(format!("integration '{key}'")))
    }

    /// Look up an endpoint of an integration
    pub fn get_endpoint(&self, integration_key: &str, endpoint_id: &str) -> Result<&EndpointDescriptor> {
        self.get_integration(integration_key)?
            .endpoint(endpoint_id)
            .ok_or_else(|| Error::NotFound(format!("endpoint '{integration_key}/{endpoint_id}'")))
    }

    /// Iterate integrations in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &IntegrationDescriptor> {
        self.integrations.iter()
    }

    /// Number of integrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}
