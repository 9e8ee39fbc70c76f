pub mod analysis;
pub mod config;
pub mod error;
pub mod interchange;
pub mod logging;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod table;

pub use error::{PipelineError, Result};
pub use model::{CanonicalDataset, PlayEvent, RawTable, Schema, Timestamp};
