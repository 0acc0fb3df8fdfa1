// `MigrationTrait` (via async_trait) requires the elided `&SchemaManager`
// form; writing `SchemaManager<'_>` fails with E0195.
#![allow(elided_lifetimes_in_paths)]

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_orders_table::Migration),
            Box::new(m20240301_000003_create_order_items_table::Migration),
            Box::new(m20240301_000004_create_batch_items_table::Migration),
            Box::new(m20240301_000005_create_batch_item_assignments_table::Migration),
            Box::new(m20240301_000006_create_audit_log_entries_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(ColumnDef::new(Products::Description).string().null())
                        .col(ColumnDef::new(Products::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_sku")
                        .table(Products::Table)
                        .col(Products::Sku)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Sku,
        Description,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::Notes).string().null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            // The pending-order selector sorts on this column.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        Status,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_order_items_table {

    use sea_orm_migration::prelude::*;

    use super::m20240301_000001_create_products_table::Products;
    use super::m20240301_000002_create_orders_table::Orders;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::CompletedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(OrderItems::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(OrderItems::UpdatedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_product")
                                .from(OrderItems::Table, OrderItems::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_product_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        CompletedQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_batch_items_table {

    use sea_orm_migration::prelude::*;

    use super::m20240301_000001_create_products_table::Products;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_batch_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(BatchItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BatchItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BatchItems::BatchId).uuid().not_null())
                        .col(ColumnDef::new(BatchItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(BatchItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(BatchItems::ContainerCode).string().null())
                        // Deprecated single-assignment column, kept for
                        // compatibility with old rows. No FK on purpose.
                        .col(ColumnDef::new(BatchItems::OrderItemId).uuid().null())
                        .col(ColumnDef::new(BatchItems::CreatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batch_items_product")
                                .from(BatchItems::Table, BatchItems::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batch_items_batch_id")
                        .table(BatchItems::Table)
                        .col(BatchItems::BatchId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batch_items_product_id")
                        .table(BatchItems::Table)
                        .col(BatchItems::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BatchItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum BatchItems {
        Table,
        Id,
        BatchId,
        ProductId,
        Quantity,
        ContainerCode,
        OrderItemId,
        CreatedAt,
    }
}

mod m20240301_000005_create_batch_item_assignments_table {

    use sea_orm_migration::prelude::*;

    use super::m20240301_000003_create_order_items_table::OrderItems;
    use super::m20240301_000004_create_batch_items_table::BatchItems;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_batch_item_assignments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(BatchItemAssignments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BatchItemAssignments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchItemAssignments::BatchItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchItemAssignments::OrderItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchItemAssignments::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchItemAssignments::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchItemAssignments::UpdatedAt)
                                .timestamp()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batch_item_assignments_batch_item")
                                .from(
                                    BatchItemAssignments::Table,
                                    BatchItemAssignments::BatchItemId,
                                )
                                .to(BatchItems::Table, BatchItems::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batch_item_assignments_order_item")
                                .from(
                                    BatchItemAssignments::Table,
                                    BatchItemAssignments::OrderItemId,
                                )
                                .to(OrderItems::Table, OrderItems::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // One row per (batch item, order item) pair; repeat assignments
            // update the quantity in place.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batch_item_assignments_pair")
                        .table(BatchItemAssignments::Table)
                        .col(BatchItemAssignments::BatchItemId)
                        .col(BatchItemAssignments::OrderItemId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BatchItemAssignments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum BatchItemAssignments {
        Table,
        Id,
        BatchItemId,
        OrderItemId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000006_create_audit_log_entries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_audit_log_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AuditLogEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AuditLogEntries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditLogEntries::Action).string().not_null())
                        .col(
                            ColumnDef::new(AuditLogEntries::Description)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditLogEntries::Quantity).integer().null())
                        .col(ColumnDef::new(AuditLogEntries::UserId).uuid().not_null())
                        .col(ColumnDef::new(AuditLogEntries::OrderId).uuid().null())
                        .col(ColumnDef::new(AuditLogEntries::ProductId).uuid().null())
                        .col(ColumnDef::new(AuditLogEntries::BatchItemId).uuid().null())
                        .col(
                            ColumnDef::new(AuditLogEntries::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_log_entries_action")
                        .table(AuditLogEntries::Table)
                        .col(AuditLogEntries::Action)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_log_entries_order_id")
                        .table(AuditLogEntries::Table)
                        .col(AuditLogEntries::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_log_entries_created_at")
                        .table(AuditLogEntries::Table)
                        .col(AuditLogEntries::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuditLogEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum AuditLogEntries {
        Table,
        Id,
        Action,
        Description,
        Quantity,
        UserId,
        OrderId,
        ProductId,
        BatchItemId,
        CreatedAt,
    }
}
