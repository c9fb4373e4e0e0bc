//! Entities persisted under the data root and the outputs they produce.

mod commit;
mod execution;
mod output;

pub use commit::Commit;
pub use execution::{Execution, ExecutionCreationData};
pub use output::{CachedOutput, Output, OUTPUT_CACHE_TABLE};
