//! Per-key serialized work engine: dedup window, key table, dispatcher and
//! worker loop.

pub mod dedup;
pub mod dispatch;
pub mod processor;
pub mod table;
mod worker;

pub use dedup::DedupWindow;
pub use dispatch::{Dispatcher, EngineConfig, SubmitResult};
pub use processor::{Failure, TaskProcessor};
