//! Out-of-process execution: wire conversion, launch and supervision.

pub mod protocol;
pub mod runner;
pub mod shim;
pub mod wire;

pub use protocol::{ResultEnvelope, RunState};
pub use runner::{ActionRunner, ConsoleChunk, RunHandle, RunReport, StreamKind};
pub use wire::{collect_inputs, ActionInput};
