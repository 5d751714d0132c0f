// 入库流水线模块

pub mod queue;
pub mod reconcile;
pub mod worker;

#[cfg(test)]
mod tests;

pub use queue::{IngestQueue, IngestTask, QueueFull};
pub use reconcile::reconcile_on_startup;
pub use worker::{spawn_workers, PipelineContext};
