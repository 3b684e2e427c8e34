pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod message;
pub mod module;
pub mod node;
pub mod registry;
pub mod worker;

pub use error::{FaultReport, InitFault, ModuleError, RegistryError, SubmitError};
pub use message::{ControlMessage, ControlOp, Handle, InitPayload, ModuleImage, Submission};
pub use module::{AnalysisKernel, ComputeModule};
pub use node::{AnalyzerNode, NodeBuilder};
pub use worker::Pipeline;
