//! State-graph workflow engine: persisted collections of states ordered as a
//! DAG, edited, sorted and executed step by step.

pub mod directory;
pub mod editor;
pub mod engine;
pub mod executor;
pub mod graph;
pub mod merge;
pub mod rerun;
pub mod script;
pub mod sort;
pub mod state;
pub mod store;

pub use directory::{ExtensionDirectory, ExtensionKind, ExtensionLocation, FileSystemDirectory};
pub use editor::InsertRequest;
pub use engine::StateEngine;
pub use executor::CallerContext;
pub use graph::StateGraph;
pub use merge::MergeMode;
pub use script::{MockScriptRunner, ScriptRequest, ScriptRunner, ShellScriptRunner};
pub use state::{
    aggregate_status, Boundary, CollectionDocument, Phase, State, StateStatus, FIRST_BOUNDARY,
    LAST_BOUNDARY,
};
pub use store::CollectionStore;
