use std::sync::Arc;

use tracing::info;

use crate::error::{CalcError, StoreError};
use crate::history::HistoryStore;
use crate::model::{Calculation, CalculationRecord, Operation};
use crate::store::RecordStore;
use crate::validate::validate;

/// Resolves, validates and applies one operation. Shared by fresh
/// calculations and history updates so both derive results the same way.
pub fn evaluate(operation: &str, a: Option<&str>, b: Option<&str>) -> Result<Calculation, CalcError> {
    let op = Operation::resolve(operation).ok_or_else(|| CalcError::UnknownOperation(operation.to_string()))?;
    let (a, b) = validate(a, b)?;
    let result = op.apply(a, b)?;
    Ok(Calculation::now(op, a, b, result))
}

/// Runs a blocking store call off the async workers.
pub(crate) async fn blocking<T, F>(store: &Arc<dyn RecordStore>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
}

/// Computes results and records them in the history.
#[derive(Clone)]
pub struct CalculationService {
    history: HistoryStore,
}

impl CalculationService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { history: HistoryStore::new(store) }
    }

    /// Evaluates `operation` on the raw operands and persists the outcome.
    /// Nothing is written unless evaluation succeeds, and the record is only
    /// returned once the store has accepted it.
    pub async fn compute(&self, operation: &str, a: Option<&str>, b: Option<&str>) -> Result<CalculationRecord, CalcError> {
        let calc = evaluate(operation, a, b)?;
        let record = self.history.create(calc).await?;

        info!(
            id = %record.uuid(),
            "Logged {}: {}, {} = {}",
            record.operation, record.operand1, record.operand2, record.result
        );
        Ok(record)
    }
}
