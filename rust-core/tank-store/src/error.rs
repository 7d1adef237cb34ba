// SPDX-License-Identifier: PMPL-1.0-or-later

use tank_core::TankError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing matched. Driver not-found errors are folded in here.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Tank(TankError),
}

impl From<TankError> for StoreError {
    fn from(e: TankError) -> Self {
        match e {
            TankError::NotFound(what) => StoreError::NotFound(what),
            TankError::InvalidArgument(msg) => StoreError::InvalidArgument(msg),
            other => StoreError::Tank(other),
        }
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
