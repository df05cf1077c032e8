use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{LockBehavior, LockType};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{CandidateQuery, FabricCatalog, InventoryStore, InventoryTransaction};
use crate::entities::{fabric, fabric_allocation, fabric_roll};
use crate::errors::ServiceError;
use crate::models::{AllocationStatus, FabricAllocation, FabricRoll, RollStatus};

impl TryFrom<fabric_roll::Model> for FabricRoll {
    type Error = ServiceError;

    fn try_from(model: fabric_roll::Model) -> Result<Self, Self::Error> {
        let status = model.status.parse::<RollStatus>().map_err(|_| {
            ServiceError::InternalError(format!(
                "roll {} has unknown status '{}'",
                model.id, model.status
            ))
        })?;
        Ok(Self {
            id: model.id,
            tenant_id: model.tenant_id,
            fabric_id: model.fabric_id,
            roll_number: model.roll_number,
            initial_length: model.initial_length,
            current_length: model.current_length,
            width: model.width,
            supplier_lot_no: model.supplier_lot_no,
            received_at: model.received_at,
            location: model.location,
            status,
            notes: model.notes,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

impl From<&FabricRoll> for fabric_roll::ActiveModel {
    fn from(roll: &FabricRoll) -> Self {
        Self {
            id: Set(roll.id),
            tenant_id: Set(roll.tenant_id),
            fabric_id: Set(roll.fabric_id),
            roll_number: Set(roll.roll_number.clone()),
            initial_length: Set(roll.initial_length),
            current_length: Set(roll.current_length),
            width: Set(roll.width),
            supplier_lot_no: Set(roll.supplier_lot_no.clone()),
            received_at: Set(roll.received_at),
            location: Set(roll.location.clone()),
            status: Set(roll.status.to_string()),
            notes: Set(roll.notes.clone()),
            created_at: Set(roll.created_at),
            updated_at: Set(roll.updated_at),
        }
    }
}

impl TryFrom<fabric_allocation::Model> for FabricAllocation {
    type Error = ServiceError;

    fn try_from(model: fabric_allocation::Model) -> Result<Self, Self::Error> {
        let status = model
            .allocation_status
            .parse::<AllocationStatus>()
            .map_err(|_| {
                ServiceError::InternalError(format!(
                    "allocation {} has unknown status '{}'",
                    model.id, model.allocation_status
                ))
            })?;
        Ok(Self {
            id: model.id,
            tenant_id: model.tenant_id,
            order_id: model.order_id,
            order_item_id: model.order_item_id,
            fabric_roll_id: model.fabric_roll_id,
            allocated_length: model.allocated_length,
            actual_used_length: model.actual_used_length,
            remnant_length: model.remnant_length,
            status,
            allocated_at: model.allocated_at,
            confirmed_at: model.confirmed_at,
            cut_at: model.cut_at,
            notes: model.notes,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

impl From<&FabricAllocation> for fabric_allocation::ActiveModel {
    fn from(allocation: &FabricAllocation) -> Self {
        Self {
            id: Set(allocation.id),
            tenant_id: Set(allocation.tenant_id),
            order_id: Set(allocation.order_id),
            order_item_id: Set(allocation.order_item_id),
            fabric_roll_id: Set(allocation.fabric_roll_id),
            allocated_length: Set(allocation.allocated_length),
            actual_used_length: Set(allocation.actual_used_length),
            remnant_length: Set(allocation.remnant_length),
            allocation_status: Set(allocation.status.to_string()),
            allocated_at: Set(allocation.allocated_at),
            confirmed_at: Set(allocation.confirmed_at),
            cut_at: Set(allocation.cut_at),
            notes: Set(allocation.notes.clone()),
            created_at: Set(allocation.created_at),
            updated_at: Set(allocation.updated_at),
        }
    }
}

fn rolls_from_models(models: Vec<fabric_roll::Model>) -> Result<Vec<FabricRoll>, ServiceError> {
    models.into_iter().map(FabricRoll::try_from).collect()
}

fn allocations_from_models(
    models: Vec<fabric_allocation::Model>,
) -> Result<Vec<FabricAllocation>, ServiceError> {
    models.into_iter().map(FabricAllocation::try_from).collect()
}

fn not_updated(err: DbErr, what: String) -> ServiceError {
    match err {
        DbErr::RecordNotUpdated => ServiceError::NotFound(what),
        other => ServiceError::db_error(other),
    }
}

/// Relational store backed by a sea-orm connection pool.
#[derive(Debug, Clone)]
pub struct SeaOrmInventoryStore {
    db: Arc<DatabaseConnection>,
    statement_timeout: Option<Duration>,
}

impl SeaOrmInventoryStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            statement_timeout: None,
        }
    }

    /// Bounds every statement run inside a transaction. Postgres only.
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Wraps a live database transaction. sea-orm rolls the transaction back
/// when it is dropped uncommitted.
pub struct SeaOrmInventoryTransaction {
    txn: DatabaseTransaction,
}

#[async_trait]
impl InventoryTransaction for SeaOrmInventoryTransaction {
    #[instrument(skip(self), fields(tenant_id = %query.tenant_id, fabric_id = %query.fabric_id))]
    async fn lock_candidate_rolls(
        &mut self,
        query: &CandidateQuery,
    ) -> Result<Vec<FabricRoll>, ServiceError> {
        let models = fabric_roll::Entity::find()
            .filter(fabric_roll::Column::TenantId.eq(query.tenant_id))
            .filter(fabric_roll::Column::FabricId.eq(query.fabric_id))
            .filter(fabric_roll::Column::Status.eq(RollStatus::Available.as_ref()))
            .filter(fabric_roll::Column::CurrentLength.gte(query.min_length))
            .filter(fabric_roll::Column::CurrentLength.gt(Decimal::ZERO))
            .order_by_asc(fabric_roll::Column::CurrentLength)
            .order_by_asc(fabric_roll::Column::CreatedAt)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&self.txn)
            .await
            .map_err(ServiceError::db_error)?;

        debug!(candidates = models.len(), "locked candidate rolls");
        rolls_from_models(models)
    }

    async fn find_roll(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Option<FabricRoll>, ServiceError> {
        fabric_roll::Entity::find_by_id(roll_id)
            .filter(fabric_roll::Column::TenantId.eq(tenant_id))
            .one(&self.txn)
            .await
            .map_err(ServiceError::db_error)?
            .map(FabricRoll::try_from)
            .transpose()
    }

    async fn find_allocation(
        &mut self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<Option<FabricAllocation>, ServiceError> {
        fabric_allocation::Entity::find_by_id(allocation_id)
            .filter(fabric_allocation::Column::TenantId.eq(tenant_id))
            .one(&self.txn)
            .await
            .map_err(ServiceError::db_error)?
            .map(FabricAllocation::try_from)
            .transpose()
    }

    async fn count_active_allocations(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<u64, ServiceError> {
        fabric_allocation::Entity::find()
            .filter(fabric_allocation::Column::TenantId.eq(tenant_id))
            .filter(fabric_allocation::Column::FabricRollId.eq(roll_id))
            .filter(
                fabric_allocation::Column::AllocationStatus
                    .ne(AllocationStatus::Cancelled.as_ref()),
            )
            .count(&self.txn)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn count_allocations(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<u64, ServiceError> {
        fabric_allocation::Entity::find()
            .filter(fabric_allocation::Column::TenantId.eq(tenant_id))
            .filter(fabric_allocation::Column::FabricRollId.eq(roll_id))
            .count(&self.txn)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn insert_roll(&mut self, roll: &FabricRoll) -> Result<(), ServiceError> {
        fabric_roll::Entity::insert(fabric_roll::ActiveModel::from(roll))
            .exec_without_returning(&self.txn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    async fn update_roll(&mut self, roll: &FabricRoll) -> Result<(), ServiceError> {
        fabric_roll::Entity::update(fabric_roll::ActiveModel::from(roll))
            .filter(fabric_roll::Column::TenantId.eq(roll.tenant_id))
            .exec(&self.txn)
            .await
            .map_err(|e| not_updated(e, format!("fabric roll {}", roll.id)))?;
        Ok(())
    }

    async fn delete_roll(&mut self, tenant_id: Uuid, roll_id: Uuid) -> Result<(), ServiceError> {
        // Also restricted by the allocation foreign key.
        if self.count_allocations(tenant_id, roll_id).await? > 0 {
            return Err(ServiceError::Conflict(format!(
                "fabric roll {} is referenced by allocations",
                roll_id
            )));
        }
        let result = fabric_roll::Entity::delete_many()
            .filter(fabric_roll::Column::Id.eq(roll_id))
            .filter(fabric_roll::Column::TenantId.eq(tenant_id))
            .exec(&self.txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("fabric roll {}", roll_id)));
        }
        Ok(())
    }

    async fn insert_allocation(
        &mut self,
        allocation: &FabricAllocation,
    ) -> Result<(), ServiceError> {
        fabric_allocation::Entity::insert(fabric_allocation::ActiveModel::from(allocation))
            .exec_without_returning(&self.txn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    async fn update_allocation(
        &mut self,
        allocation: &FabricAllocation,
    ) -> Result<(), ServiceError> {
        fabric_allocation::Entity::update(fabric_allocation::ActiveModel::from(allocation))
            .filter(fabric_allocation::Column::TenantId.eq(allocation.tenant_id))
            .exec(&self.txn)
            .await
            .map_err(|e| not_updated(e, format!("fabric allocation {}", allocation.id)))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.txn.commit().await.map_err(ServiceError::db_error)
    }
}

#[async_trait]
impl InventoryStore for SeaOrmInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTransaction>, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        if let Some(timeout) = self.statement_timeout {
            if txn.get_database_backend() == DatabaseBackend::Postgres {
                txn.execute_unprepared(&format!(
                    "SET LOCAL statement_timeout = {}",
                    timeout.as_millis()
                ))
                .await
                .map_err(ServiceError::db_error)?;
            }
        }
        Ok(Box::new(SeaOrmInventoryTransaction { txn }))
    }

    async fn get_roll(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Option<FabricRoll>, ServiceError> {
        fabric_roll::Entity::find_by_id(roll_id)
            .filter(fabric_roll::Column::TenantId.eq(tenant_id))
            .one(self.connection())
            .await
            .map_err(ServiceError::db_error)?
            .map(FabricRoll::try_from)
            .transpose()
    }

    async fn get_roll_by_number(
        &self,
        tenant_id: Uuid,
        roll_number: &str,
    ) -> Result<Option<FabricRoll>, ServiceError> {
        fabric_roll::Entity::find()
            .filter(fabric_roll::Column::TenantId.eq(tenant_id))
            .filter(fabric_roll::Column::RollNumber.eq(roll_number))
            .one(self.connection())
            .await
            .map_err(ServiceError::db_error)?
            .map(FabricRoll::try_from)
            .transpose()
    }

    async fn list_rolls(
        &self,
        tenant_id: Uuid,
        fabric_id: Uuid,
        status: Option<RollStatus>,
    ) -> Result<Vec<FabricRoll>, ServiceError> {
        let mut query = fabric_roll::Entity::find()
            .filter(fabric_roll::Column::TenantId.eq(tenant_id))
            .filter(fabric_roll::Column::FabricId.eq(fabric_id));
        if let Some(status) = status {
            query = query.filter(fabric_roll::Column::Status.eq(status.as_ref()));
        }
        let models = query
            .order_by_desc(fabric_roll::Column::CreatedAt)
            .all(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        rolls_from_models(models)
    }

    async fn get_allocation(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<Option<FabricAllocation>, ServiceError> {
        fabric_allocation::Entity::find_by_id(allocation_id)
            .filter(fabric_allocation::Column::TenantId.eq(tenant_id))
            .one(self.connection())
            .await
            .map_err(ServiceError::db_error)?
            .map(FabricAllocation::try_from)
            .transpose()
    }

    async fn list_allocations_by_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError> {
        let models = fabric_allocation::Entity::find()
            .filter(fabric_allocation::Column::TenantId.eq(tenant_id))
            .filter(fabric_allocation::Column::OrderId.eq(order_id))
            .order_by_asc(fabric_allocation::Column::AllocatedAt)
            .all(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        allocations_from_models(models)
    }

    async fn list_active_allocations_by_roll(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError> {
        let models = fabric_allocation::Entity::find()
            .filter(fabric_allocation::Column::TenantId.eq(tenant_id))
            .filter(fabric_allocation::Column::FabricRollId.eq(roll_id))
            .filter(
                fabric_allocation::Column::AllocationStatus
                    .ne(AllocationStatus::Cancelled.as_ref()),
            )
            .order_by_asc(fabric_allocation::Column::AllocatedAt)
            .all(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        allocations_from_models(models)
    }
}

#[async_trait]
impl FabricCatalog for SeaOrmInventoryStore {
    async fn fabric_exists(&self, tenant_id: Uuid, fabric_id: Uuid) -> Result<bool, ServiceError> {
        let count = fabric::Entity::find_by_id(fabric_id)
            .filter(fabric::Column::TenantId.eq(tenant_id))
            .count(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(count > 0)
    }

    async fn register_fabric(
        &self,
        tenant_id: Uuid,
        name: &str,
        sku: Option<String>,
    ) -> Result<Uuid, ServiceError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let model = fabric::ActiveModel {
            id: Set(id),
            tenant_id: Set(tenant_id),
            name: Set(name.to_string()),
            sku: Set(sku),
            created_at: Set(now),
            updated_at: Set(now),
        };
        fabric::Entity::insert(model)
            .exec_without_returning(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(id)
    }
}
