pub mod checkpoint;
pub mod db;
pub mod interaction;
pub mod io;

pub use db::HomeScoutDb;

pub use checkpoint::{Checkpoint, CheckpointStore, RunStatus, RunSummary};
pub use interaction::{
    Interaction, InteractionKind, InteractionManager, InteractionResponse, InteractionStatus,
};
