use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fabric_rolls")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub fabric_id: Uuid,
    pub roll_number: String,
    #[sea_orm(column_type = "Decimal(Some((12, 3)))")]
    pub initial_length: Decimal,
    #[sea_orm(column_type = "Decimal(Some((12, 3)))")]
    pub current_length: Decimal,
    #[sea_orm(column_type = "Decimal(Some((8, 2)))", nullable)]
    pub width: Option<Decimal>,
    pub supplier_lot_no: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::fabric::Entity",
        from = "Column::FabricId",
        to = "super::fabric::Column::Id"
    )]
    Fabric,
    #[sea_orm(has_many = "super::fabric_allocation::Entity")]
    FabricAllocations,
}

impl Related<super::fabric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Fabric.def()
    }
}

impl Related<super::fabric_allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FabricAllocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
