use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{CalcError, MISSING_PARAMETERS};
use crate::model::{Calculation, CalculationRecord, Operation};
use crate::service::{blocking, evaluate};
use crate::store::RecordStore;

/// CRUD view over the calculation history.
///
/// Ids arrive as raw path segments; one that is not a UUID cannot name a
/// record and is reported as not found.
#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn RecordStore>,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, calc: Calculation) -> Result<CalculationRecord, CalcError> {
        blocking(&self.store, move |store| store.insert(calc))
        .await
        .map_err(|e| {
            error!(operation = %calc.operation, error = %e, "Error logging calculation");
            CalcError::from(e)
        })
    }

    /// All records in creation order, optionally only those of one operation.
    /// An unknown operation name matches nothing.
    pub async fn list(&self, operation: Option<&str>) -> Result<Vec<CalculationRecord>, CalcError> {
        let filter = match operation {
            Some(name) => match Operation::resolve(name) {
                Some(op) => Some(op),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        blocking(&self.store, move |store| store.find(filter))
        .await
        .map_err(|e| {
            error!(error = %e, "Error fetching history");
            CalcError::from(e)
        })
    }

    pub async fn get(&self, id: &str) -> Result<CalculationRecord, CalcError> {
        let uuid = parse_id(id)?;

        let found = blocking(&self.store, move |store| store.find_by_id(uuid))
        .await
        .map_err(|e| {
            error!(%id, error = %e, "Error fetching calculation");
            CalcError::from(e)
        })?;

        found.ok_or_else(|| {
            warn!(%id, "Calculation not found");
            CalcError::NotFound(id.to_string())
        })
    }

    /// Re-derives the result from the new inputs and overwrites the record.
    /// The stored result is never taken from the caller.
    pub async fn update(
        &self,
        id: &str,
        operation: Option<&str>,
        a: Option<&str>,
        b: Option<&str>,
    ) -> Result<CalculationRecord, CalcError> {
        let operation = operation.filter(|op| !op.is_empty());
        let (Some(operation), Some(_), Some(_)) = (operation, a, b) else {
            warn!(%id, "Invalid or missing parameters");
            return Err(CalcError::InvalidInput(MISSING_PARAMETERS.to_string()));
        };
        let calc = evaluate(operation, a, b).map_err(|e| match e {
            CalcError::InvalidInput(_) => CalcError::InvalidInput(MISSING_PARAMETERS.to_string()),
            other => other,
        })?;
        let uuid = parse_id(id)?;

        let updated = blocking(&self.store, move |store| store.replace(uuid, calc))
        .await
        .map_err(|e| {
            error!(%id, error = %e, "Error updating calculation");
            CalcError::from(e)
        })?;

        match updated {
            Some(record) => {
                info!(
                    %id,
                    "Updated calculation: {}({}, {}) = {}",
                    record.operation, record.operand1, record.operand2, record.result
                );
                Ok(record)
            }
            None => {
                warn!(%id, "Calculation not found for update");
                Err(CalcError::NotFound(id.to_string()))
            }
        }
    }

    /// Removes the record and returns it as it was before removal.
    pub async fn delete(&self, id: &str) -> Result<CalculationRecord, CalcError> {
        let uuid = parse_id(id)?;

        let removed = blocking(&self.store, move |store| store.remove(uuid))
        .await
        .map_err(|e| {
            error!(%id, error = %e, "Error deleting calculation");
            CalcError::from(e)
        })?;

        match removed {
            Some(record) => {
                info!(%id, "Deleted calculation");
                Ok(record)
            }
            None => Err(CalcError::NotFound(id.to_string())),
        }
    }
}

fn parse_id(id: &str) -> Result<Uuid, CalcError> {
    Uuid::parse_str(id).map_err(|_| CalcError::NotFound(id.to_string()))
}
