pub mod cluster_sync_state;
pub mod events;

pub mod prelude {
    pub use super::cluster_sync_state::{
        ActiveModel as ClusterSyncStateActiveModel, Column as ClusterSyncStateColumn,
        Entity as ClusterSyncStateEntity,
    };
    pub use super::events::{
        ActiveModel as EventActiveModel, Column as EventColumn, Entity as EventEntity, Model as EventModel,
    };
}
