use crate::engine::error::ModuleError;
use crate::engine::message::{ControlOp, ModuleImage};
use crate::spectral::spectrum::SpectrumFrame;

/// Capability interface to the compiled compute kernel.
///
/// Injected into the pipeline at spawn time; the engine never reaches for
/// module bindings through ambient global state. `instantiate` is the slow
/// path (validation, table building) and runs on a dedicated thread so a
/// long compile never stalls the pipeline's message loop.
pub trait ComputeModule: Send + Sync + 'static {
    fn instantiate(&self, image: &ModuleImage) -> Result<Box<dyn AnalysisKernel>, ModuleError>;
}

/// A compiled, per-instance analysis kernel.
///
/// Driven entirely by the worker thread: raw blocks go in through `ingest`,
/// aggregated frames come back out of `poll_frame`. None of these calls are
/// realtime-constrained.
pub trait AnalysisKernel: Send {
    /// Feeds one block of raw samples.
    fn ingest(&mut self, samples: &[f32]);

    /// Returns the next due aggregation result, `None` when nothing is due.
    /// Called repeatedly until it returns `None`.
    fn poll_frame(&mut self) -> Option<SpectrumFrame>;

    /// Applies a control operation. Tags the kernel does not understand are
    /// ignored.
    fn control(&mut self, op: &ControlOp);

    /// Clears accumulated state.
    fn reset(&mut self);
}
