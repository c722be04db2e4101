use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum CheckIns {
    Table,
    Id,
    UserId,
    CheckInTime,
    CheckOutTime,
    Location,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CheckIns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CheckIns::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CheckIns::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(CheckIns::CheckInTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CheckIns::CheckOutTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(CheckIns::Location).string_len(64).null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_check_ins_user_time")
                    .table(CheckIns::Table)
                    .col(CheckIns::UserId)
                    .col(CheckIns::CheckInTime)
                    .to_owned(),
            )
            .await?;

        // 每个用户最多一个未签出的会话
        let stmt = sea_orm::Statement::from_string(
            manager.get_database_backend(),
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_check_ins_one_open ON check_ins(user_id) WHERE check_out_time IS NULL".to_owned(),
        );
        manager.get_connection().execute(stmt).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().if_exists().table(CheckIns::Table).to_owned())
            .await?;
        Ok(())
    }
}
