//! Catalog file and directory loader

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{IntegrationDescriptor, parse_catalog_file};
use crate::{Error, Result};

/// Loader for integration descriptors from files and directories
pub struct CatalogLoader;

impl CatalogLoader {
    /// Load integrations from a YAML file or a directory of YAML files
    ///
    /// Directory entries are visited in file-name order so the resulting
    /// display order is stable across platforms.
    pub async fn load_path(path: &Path) -> Result<Vec<IntegrationDescriptor>> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Catalog path does not exist: {}",
                path.display()
            )));
        }

        let mut integrations = Vec::new();

        if path.is_dir() {
            Self::load_directory_recursive(path, &mut integrations).await?;
        } else {
            integrations.extend(parse_catalog_file(path).await?);
        }

        info!(
            count = integrations.len(),
            path = %path.display(),
            "Loaded integrations"
        );

        Ok(integrations)
    }

    async fn load_directory_recursive(
        dir: &Path,
        integrations: &mut Vec<IntegrationDescriptor>,
    ) -> Result<()> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| Error::Config(format!("Failed to read directory {dir:?}: {e}")))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Config(format!("Failed to read directory entry: {e}")))?
        {
            paths.push(entry.path());
        }
        paths.sort();

        for path in paths {
            // Skip hidden files/directories
            if path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'))
            {
                continue;
            }

            if path.is_dir() {
                Box::pin(Self::load_directory_recursive(&path, integrations)).await?;
            } else if path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
            {
                let loaded = parse_catalog_file(&path).await?;
                for integration in &loaded {
                    debug!(key = %integration.key, path = %path.display(), "Loaded integration");
                }
                integrations.extend(loaded);
            }
        }

        Ok(())
    }
}
