pub mod error;
pub mod graph;
pub mod materializer;
pub mod sqlite_graph;

pub use error::{Result, StoreError};
pub use graph::{edge, prop, Direction, EdgeRecord, GraphStore, PropMap, Vertex};
pub use sqlite_graph::SqliteGraph;
