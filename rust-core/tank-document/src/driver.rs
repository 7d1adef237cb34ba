// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Document-store driver: one connection, one router, one listener.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use tank_core::{Driver, DriverKind, Tank, TankError, TankSpec};

use crate::client::DocumentClient;
use crate::listener::{ListenerConfig, ListenerRegistry, OplogListener};
use crate::router::WatchRouter;
use crate::tank::DocumentTank;

pub struct DocumentDriver {
    name: String,
    database: String,
    client: Arc<dyn DocumentClient>,
    router: Arc<WatchRouter>,
    listeners: Arc<ListenerRegistry>,
    listener: Arc<OplogListener>,
    subscriber_capacity: usize,
}

impl DocumentDriver {
    /// Start the operation-log listener for `client` and wrap it in a driver
    /// named after `config.name`.
    ///
    /// Fails with a configuration error when a listener of the same name is
    /// already running.
    pub fn connect(
        database: impl Into<String>,
        client: Arc<dyn DocumentClient>,
        config: ListenerConfig,
        listeners: Arc<ListenerRegistry>,
    ) -> Result<Arc<Self>, TankError> {
        let router = Arc::new(WatchRouter::new());
        let name = config.name.clone();
        let subscriber_capacity = config.subscriber_capacity;
        let listener = listeners.start(config, client.clone(), router.clone())?;
        let database = database.into();
        info!(driver = %name, database = %database, "Document driver connected");
        Ok(Arc::new(Self {
            name,
            database,
            client,
            router,
            listeners,
            listener,
            subscriber_capacity,
        }))
    }

    pub fn router(&self) -> &Arc<WatchRouter> {
        &self.router
    }

    pub fn listener(&self) -> &Arc<OplogListener> {
        &self.listener
    }
}

#[async_trait]
impl Driver for DocumentDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Document
    }

    fn tank(&self) -> Box<dyn Tank> {
        Box::new(DocumentTank::new(
            self.client.clone(),
            self.router.clone(),
            self.subscriber_capacity,
            TankSpec::new(self.database.clone()),
        ))
    }

    async fn close(&self) -> Result<(), TankError> {
        self.listeners.stop(&self.name).await;
        self.client.close().await?;
        info!(driver = %self.name, "Document driver closed");
        Ok(())
    }
}
