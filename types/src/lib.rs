mod aianalysis;
mod approval;
mod notification;
mod pipelinerun;
mod shared;
mod workflowexecution;

pub use aianalysis::*;
pub use approval::*;
pub use notification::*;
pub use pipelinerun::*;
pub use shared::*;
pub use workflowexecution::*;

/// API group shared by every kind in this crate.
pub const API_GROUP: &str = "kubernaut.io";
