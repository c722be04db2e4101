use sea_orm_migration::prelude::extension::postgres::Type;
use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum MembershipPlans {
    Table,
    Id,
    Name,
    Price,
    DurationDays,
    AccessLevel,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UserMemberships {
    Table,
    Id,
    UserId,
    PlanId,
    StartDate,
    EndDate,
    Status,
    PaymentStatus,
    PaymentMethod,
    ExternalSubscriptionRef,
    CancelledAt,
    ProcessorSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(Alias::new("membership_status"))
                    .values(vec![
                        Alias::new("active"),
                        Alias::new("expired"),
                        Alias::new("cancelled"),
                    ])
                    .to_owned(),
            )
            .await?;
        manager
            .create_type(
                Type::create()
                    .as_enum(Alias::new("membership_payment_status"))
                    .values(vec![
                        Alias::new("paid"),
                        Alias::new("pending"),
                        Alias::new("failed"),
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MembershipPlans::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MembershipPlans::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MembershipPlans::Name).string_len(255).not_null())
                    .col(ColumnDef::new(MembershipPlans::Price).big_integer().not_null())
                    .col(
                        ColumnDef::new(MembershipPlans::DurationDays)
                            .integer()
                            .not_null()
                            .check(Expr::col(MembershipPlans::DurationDays).gt(0)),
                    )
                    .col(
                        ColumnDef::new(MembershipPlans::AccessLevel)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MembershipPlans::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::cust("NOW()"))
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserMemberships::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserMemberships::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserMemberships::UserId).big_integer().not_null())
                    .col(ColumnDef::new(UserMemberships::PlanId).big_integer().not_null())
                    .col(
                        ColumnDef::new(UserMemberships::StartDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::EndDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::Status)
                            .custom(Alias::new("membership_status"))
                            .not_null()
                            .default(Expr::cust("'active'::membership_status")),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::PaymentStatus)
                            .custom(Alias::new("membership_payment_status"))
                            .not_null()
                            .default(Expr::cust("'pending'::membership_payment_status")),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::PaymentMethod)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::ExternalSubscriptionRef)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::ProcessorSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::cust("NOW()"))
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserMemberships::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::cust("NOW()"))
                            .null(),
                    )
                    .check(
                        Expr::col(UserMemberships::EndDate)
                            .gte(Expr::col(UserMemberships::StartDate)),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_memberships_plan")
                            .from(UserMemberships::Table, UserMemberships::PlanId)
                            .to(MembershipPlans::Table, MembershipPlans::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_user_memberships_user_start")
                    .table(UserMemberships::Table)
                    .col(UserMemberships::UserId)
                    .col(UserMemberships::StartDate)
                    .to_owned(),
            )
            .await?;

        // Partial indexes carry the store-level invariants; SeaQuery can't express WHERE on an index.
        for sql in [
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_user_memberships_one_active ON user_memberships(user_id) WHERE status = 'active'",
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_user_memberships_subscription_ref ON user_memberships(external_subscription_ref) WHERE external_subscription_ref IS NOT NULL",
        ] {
            let stmt = sea_orm::Statement::from_string(
                manager.get_database_backend(),
                sql.to_owned(),
            );
            manager.get_connection().execute(stmt).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(UserMemberships::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(MembershipPlans::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_type(
                Type::drop()
                    .name(Alias::new("membership_payment_status"))
                    .to_owned(),
            )
            .await?;
        manager
            .drop_type(Type::drop().name(Alias::new("membership_status")).to_owned())
            .await?;
        Ok(())
    }
}
