//! Optional catalogue of served operations.
//!
//! An empty catalogue accepts everything. Once an operation is registered,
//! incoming messages must name a registered area, version, service and
//! operation; the first mismatch decides the error number.

use std::collections::HashSet;

use parking_lot::RwLock;
use spacebus_message::{errors, OperationId};

use crate::error::{Result, TransportError};

#[derive(Debug, Default)]
pub struct ContractCatalog {
    operations: RwLock<HashSet<OperationId>>,
}

impl ContractCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, operation: OperationId) -> bool {
        self.operations.write().insert(operation)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.read().is_empty()
    }

    pub fn check(&self, operation: OperationId) -> Result<()> {
        let operations = self.operations.read();
        if operations.is_empty() || operations.contains(&operation) {
            return Ok(());
        }

        let area: Vec<&OperationId> = operations
            .iter()
            .filter(|known| known.area == operation.area)
            .collect();
        let number = if area.is_empty() {
            errors::UNSUPPORTED_AREA
        } else if !area.iter().any(|k| k.area_version == operation.area_version) {
            errors::UNSUPPORTED_AREA_VERSION
        } else if !area
            .iter()
            .any(|k| k.area_version == operation.area_version && k.service == operation.service)
        {
            errors::UNSUPPORTED_SERVICE
        } else {
            errors::UNSUPPORTED_OPERATION
        };
        Err(TransportError::UnsupportedContract { operation, number })
    }
}
