pub mod config;
pub mod error;
pub mod state_graph;
pub mod types;

pub use config::{ConfigLoader, EngineConfig};
pub use error::AppError;
pub use state_graph::{
    Boundary, CollectionDocument, InsertRequest, State, StateEngine, StateStatus,
};
pub use types::*;
