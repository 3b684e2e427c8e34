use std::fmt;
use std::sync::Arc;

use crate::core::quantum::AudioQuantum;
use crate::core::ring::{Consumer, Producer};
use crate::engine::node::NodeShared;
use crate::spectral::spectrum::SpectrumFrame;

/// Opaque identifier for a live processor instance.
///
/// Handles are plain integers so they can cross the thread boundary without
/// sharing any pointer; the worker-side registry is the only place a handle
/// is resolved back to an instance. A handle is never reused while its
/// instance is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration blob a compute module compiles into an analysis kernel.
///
/// Validated by [`ComputeModule::instantiate`](crate::engine::module::ComputeModule::instantiate);
/// a malformed image surfaces as an initialization fault, never a panic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModuleImage {
    pub version: u32,
    pub sample_rate: f32,
    pub fft_size: u32,
    pub averaging: f32,
}

impl ModuleImage {
    pub const CURRENT_VERSION: u32 = 1;
}

/// Steady-state instruction for a processor instance.
///
/// The tag set is the compute module's interface; unknown-to-the-kernel tags
/// are ignored by the kernel, not errors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlOp {
    /// Exponential averaging factor for spectrum aggregation, `0.0..1.0`.
    SetAveraging(f32),
    /// RMS level the adaptive monitor gain steers toward; `0.0` disables it.
    SetGainTarget(f32),
    /// Fixed gain applied after the adaptive stage.
    SetMonitorGain(f32),
    /// Clears accumulated analysis state.
    Reset,
    /// Retires the instance: the registry entry is removed and the realtime
    /// node reports `false` from its next `process` call.
    Retire,
}

/// A control operation addressed to one instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlMessage {
    pub handle: Handle,
    pub op: ControlOp,
}

/// Worker-side endpoints of the memory shared with one realtime node: the
/// two ring halves and the atomic parameter block.
pub struct SharedRegion {
    pub(crate) samples: Consumer<AudioQuantum>,
    pub(crate) frames: Producer<SpectrumFrame>,
    pub(crate) shared: Arc<NodeShared>,
}

/// Everything needed to bring one instance up: consumed exactly once, at
/// instantiation time.
pub struct InitPayload {
    pub(crate) image: ModuleImage,
    pub(crate) region: SharedRegion,
    pub(crate) handle: Handle,
}

impl InitPayload {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn image(&self) -> &ModuleImage {
        &self.image
    }
}

/// Inbound edge of the worker pipeline.
pub enum Submission {
    Init(InitPayload),
    Control(ControlMessage),
}
