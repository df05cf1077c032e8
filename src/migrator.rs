use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_fabrics_table::Migration),
            Box::new(m20250301_000002_create_fabric_rolls_table::Migration),
            Box::new(m20250301_000003_create_fabric_allocations_table::Migration),
        ]
    }
}

mod m20250301_000001_create_fabrics_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_fabrics_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Fabrics::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Fabrics::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Fabrics::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Fabrics::Name).string().not_null())
                        .col(ColumnDef::new(Fabrics::Sku).string().null())
                        .col(
                            ColumnDef::new(Fabrics::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Fabrics::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_fabrics_tenant_id")
                        .table(Fabrics::Table)
                        .col(Fabrics::TenantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Fabrics::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Fabrics {
        Table,
        Id,
        TenantId,
        Name,
        Sku,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_fabric_rolls_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_fabric_rolls_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(FabricRolls::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(FabricRolls::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(FabricRolls::TenantId).uuid().not_null())
                        .col(ColumnDef::new(FabricRolls::FabricId).uuid().not_null())
                        .col(ColumnDef::new(FabricRolls::RollNumber).string().not_null())
                        .col(
                            ColumnDef::new(FabricRolls::InitialLength)
                                .decimal_len(12, 3)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FabricRolls::CurrentLength)
                                .decimal_len(12, 3)
                                .not_null(),
                        )
                        .col(ColumnDef::new(FabricRolls::Width).decimal_len(8, 2).null())
                        .col(ColumnDef::new(FabricRolls::SupplierLotNo).string().null())
                        .col(
                            ColumnDef::new(FabricRolls::ReceivedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(FabricRolls::Location).string().null())
                        .col(
                            ColumnDef::new(FabricRolls::Status)
                                .string()
                                .not_null()
                                .default("AVAILABLE"),
                        )
                        .col(ColumnDef::new(FabricRolls::Notes).text().null())
                        .col(
                            ColumnDef::new(FabricRolls::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FabricRolls::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::col(FabricRolls::CurrentLength).gte(0))
                        .check(
                            Expr::col(FabricRolls::CurrentLength)
                                .lte(Expr::col(FabricRolls::InitialLength)),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_fabric_rolls_fabric_id")
                                .from(FabricRolls::Table, FabricRolls::FabricId)
                                .to(Fabrics::Table, Fabrics::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("uq_fabric_rolls_tenant_roll_number")
                        .table(FabricRolls::Table)
                        .col(FabricRolls::TenantId)
                        .col(FabricRolls::RollNumber)
                        .to_owned(),
                )
                .await?;

            // Candidate lookup: tenant + fabric + status, ordered by remaining length.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_fabric_rolls_candidates")
                        .table(FabricRolls::Table)
                        .col(FabricRolls::TenantId)
                        .col(FabricRolls::FabricId)
                        .col(FabricRolls::Status)
                        .col(FabricRolls::CurrentLength)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(FabricRolls::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Fabrics {
        Table,
        Id,
    }

    #[derive(Iden)]
    enum FabricRolls {
        Table,
        Id,
        TenantId,
        FabricId,
        RollNumber,
        InitialLength,
        CurrentLength,
        Width,
        SupplierLotNo,
        ReceivedAt,
        Location,
        Status,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000003_create_fabric_allocations_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_fabric_allocations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(FabricAllocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(FabricAllocations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(FabricAllocations::TenantId).uuid().not_null())
                        .col(ColumnDef::new(FabricAllocations::OrderId).uuid().not_null())
                        .col(ColumnDef::new(FabricAllocations::OrderItemId).uuid().null())
                        .col(
                            ColumnDef::new(FabricAllocations::FabricRollId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::AllocatedLength)
                                .decimal_len(12, 3)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::ActualUsedLength)
                                .decimal_len(12, 3)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::RemnantLength)
                                .decimal_len(12, 3)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::AllocationStatus)
                                .string()
                                .not_null()
                                .default("RESERVED"),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::AllocatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::CutAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(FabricAllocations::Notes).text().null())
                        .col(
                            ColumnDef::new(FabricAllocations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FabricAllocations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::col(FabricAllocations::AllocatedLength).gt(0))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_fabric_allocations_roll_id")
                                .from(FabricAllocations::Table, FabricAllocations::FabricRollId)
                                .to(FabricRolls::Table, FabricRolls::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_fabric_allocations_order")
                        .table(FabricAllocations::Table)
                        .col(FabricAllocations::TenantId)
                        .col(FabricAllocations::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_fabric_allocations_roll")
                        .table(FabricAllocations::Table)
                        .col(FabricAllocations::TenantId)
                        .col(FabricAllocations::FabricRollId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(FabricAllocations::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum FabricRolls {
        Table,
        Id,
    }

    #[derive(Iden)]
    enum FabricAllocations {
        Table,
        Id,
        TenantId,
        OrderId,
        OrderItemId,
        FabricRollId,
        AllocatedLength,
        ActualUsedLength,
        RemnantLength,
        AllocationStatus,
        AllocatedAt,
        ConfirmedAt,
        CutAt,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}
