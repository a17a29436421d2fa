use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::{Alias, IndexType};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Events::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Events::Pubkey).text().not_null())
                    .col(ColumnDef::new(Events::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Events::Kind).integer().not_null())
                    .col(ColumnDef::new(Events::Tags).json_binary().not_null())
                    .col(ColumnDef::new(Events::Content).text().not_null())
                    .col(ColumnDef::new(Events::Sig).text().not_null())
                    .to_owned(),
            )
            .await?;

        // Index plan (spec §4.1 item 6 / §3.1 uniqueness).
        manager
            .create_index(
                Index::create()
                    .name("idx_events_created_at")
                    .table(Events::Table)
                    .col((Events::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_events_kind_created_at")
                    .table(Events::Table)
                    .col(Events::Kind)
                    .col(Events::CreatedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_events_pubkey_created_at")
                    .table(Events::Table)
                    .col(Events::Pubkey)
                    .col(Events::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Inverted indexes backing the `tags @> '...'::jsonb` containment
        // predicates in tag-filtered queries (spec §4.1 index plan item 5).
        manager
            .create_index(
                Index::create()
                    .name("idx_events_tags_gin")
                    .table(Events::Table)
                    .col(Events::Tags)
                    .index_type(IndexType::Custom(Alias::new("gin").into_iden()))
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_events_pubkey_tags_gin")
                    .table(Events::Table)
                    .col(Events::Pubkey)
                    .col(Events::Tags)
                    .index_type(IndexType::Custom(Alias::new("gin").into_iden()))
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_events_kind_tags_gin")
                    .table(Events::Table)
                    .col(Events::Kind)
                    .col(Events::Tags)
                    .index_type(IndexType::Custom(Alias::new("gin").into_iden()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ClusterSyncState::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ClusterSyncState::NodeId).text().not_null().primary_key())
                    .col(ColumnDef::new(ClusterSyncState::LastSeen).big_integer().not_null())
                    .col(
                        ColumnDef::new(ClusterSyncState::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClusterSyncState::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
    Pubkey,
    CreatedAt,
    Kind,
    Tags,
    Content,
    Sig,
}

#[derive(DeriveIden)]
enum ClusterSyncState {
    Table,
    NodeId,
    LastSeen,
    UpdatedAt,
}
