use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fabric_allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Option<Uuid>,
    pub fabric_roll_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((12, 3)))")]
    pub allocated_length: Decimal,
    #[sea_orm(column_type = "Decimal(Some((12, 3)))", nullable)]
    pub actual_used_length: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((12, 3)))", nullable)]
    pub remnant_length: Option<Decimal>,
    pub allocation_status: String,
    pub allocated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cut_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::fabric_roll::Entity",
        from = "Column::FabricRollId",
        to = "super::fabric_roll::Column::Id"
    )]
    FabricRoll,
}

impl Related<super::fabric_roll::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FabricRoll.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
