use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Calculation, CalculationRecord, Operation};

/// The persistence service behind the history.
///
/// Each method is atomic for the single record it touches. Implementations
/// assign ids on insert and keep records in creation order.
pub trait RecordStore: Send + Sync + 'static {
    fn insert(&self, calc: Calculation) -> Result<CalculationRecord, StoreError>;

    fn find(&self, operation: Option<Operation>) -> Result<Vec<CalculationRecord>, StoreError>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<CalculationRecord>, StoreError>;

    /// Overwrites everything but the id. The stored timestamp always moves
    /// forward, even within one clock tick. `None` when the id is unknown.
    fn replace(&self, id: Uuid, calc: Calculation) -> Result<Option<CalculationRecord>, StoreError>;

    /// Removes the record and returns what was stored. `None` when the id is unknown.
    fn remove(&self, id: Uuid) -> Result<Option<CalculationRecord>, StoreError>;
}
