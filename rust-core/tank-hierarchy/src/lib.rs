// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tank hierarchical-store driver.
//!
//! Maps resources onto a coordination service's node tree. Conditions are
//! evaluated in memory against each child node's JSON data.

pub mod client;
pub mod tank;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use tank_core::{Driver, DriverKind, Tank, TankError, TankSpec};

pub use client::{InMemoryNodeTree, NodeClient, NodeError};
pub use tank::{HierarchyConfig, HierarchyTank};

pub struct HierarchyDriver {
    name: String,
    database: String,
    client: Arc<dyn NodeClient>,
    config: Arc<HierarchyConfig>,
}

impl HierarchyDriver {
    pub fn new(
        name: impl Into<String>,
        database: impl Into<String>,
        client: Arc<dyn NodeClient>,
        config: HierarchyConfig,
    ) -> Arc<Self> {
        let driver = Self {
            name: name.into(),
            database: database.into(),
            client,
            config: Arc::new(config),
        };
        info!(driver = %driver.name, root = %driver.config.root, "Hierarchy driver ready");
        Arc::new(driver)
    }
}

#[async_trait]
impl Driver for HierarchyDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Hierarchy
    }

    fn tank(&self) -> Box<dyn Tank> {
        Box::new(HierarchyTank::new(
            self.client.clone(),
            self.config.clone(),
            TankSpec::new(self.database.clone()),
        ))
    }

    async fn close(&self) -> Result<(), TankError> {
        self.client.close().await?;
        Ok(())
    }
}
