// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Driver registry: config name → connected driver.
//
// The registry is an explicit value owned by whoever wires the process
// together. Registering a name twice and looking up an unknown name are both
// configuration errors.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::TankError;
use crate::tank::Tank;

/// Which backend family a driver talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Document,
    Hierarchy,
}

/// A connected backend that hands out tanks.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> DriverKind;

    /// A fresh tank bound to the driver's default database.
    fn tank(&self) -> Box<dyn Tank>;

    /// Release the backend connection and any background tasks.
    async fn close(&self) -> Result<(), TankError>;
}

#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<(), TankError> {
        let mut drivers = self.drivers.write().unwrap_or_else(PoisonError::into_inner);
        let name = driver.name().to_string();
        if drivers.contains_key(&name) {
            return Err(TankError::Config(format!("duplicate driver '{name}'")));
        }
        info!(driver = %name, kind = ?driver.kind(), "Registered driver");
        drivers.insert(name, driver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver>, TankError> {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| TankError::Config(format!("driver not registered '{name}'")))
    }

    /// Tank factory: a fresh tank from the named driver.
    pub fn tank(&self, name: &str) -> Result<Box<dyn Tank>, TankError> {
        Ok(self.get(name)?.tank())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Close and forget every driver.
    pub async fn close_all(&self) -> Result<(), TankError> {
        let drivers: Vec<Arc<dyn Driver>> = self
            .drivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, driver)| driver)
            .collect();
        for driver in drivers {
            debug!(driver = %driver.name(), "Closing driver");
            driver.close().await?;
        }
        Ok(())
    }
}
