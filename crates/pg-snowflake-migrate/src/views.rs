//! Publication of the derived reporting views.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::SchemaCatalog;
use crate::core::identifier::canonicalize;
use crate::core::traits::TargetWriter;
use crate::core::ViewSpec;
use crate::error::{MigrateError, Result};

/// (Re)defines every catalog view on the target.
///
/// Must run after all base tables are migrated. A missing base table is a
/// [`MigrateError::View`], which callers treat as fatal.
pub struct ViewPublisher {
    catalog: Arc<SchemaCatalog>,
    target: Arc<dyn TargetWriter>,
}

impl ViewPublisher {
    pub fn new(catalog: Arc<SchemaCatalog>, target: Arc<dyn TargetWriter>) -> Self {
        Self { catalog, target }
    }

    /// Publish all views in catalog order; returns their names.
    pub async fn publish(&self) -> Result<Vec<String>> {
        let mut published = Vec::with_capacity(self.catalog.view_specs().len());
        for view in self.catalog.view_specs() {
            self.publish_view(view).await?;
            published.push(view.name.clone());
        }
        info!("Published {} views", published.len());
        Ok(published)
    }

    /// Replace one view's definition.
    pub async fn publish_view(&self, view: &ViewSpec) -> Result<()> {
        for table in view.referenced_tables() {
            let name = canonicalize(table);
            if !self.target.table_exists(&name).await? {
                return Err(MigrateError::view(
                    &view.name,
                    format!("base table {} has not been migrated", name),
                ));
            }
        }

        debug!("Creating view {}", view.name);
        self.target.create_view(view).await
    }
}
