use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::core::quantum::AudioQuantum;
use crate::core::ring::{Consumer, Producer};
use crate::engine::message::{ControlOp, Handle, SharedRegion};
use crate::engine::module::AnalysisKernel;
use crate::engine::node::NodeShared;
use crate::spectral::spectrum::SpectrumFrame;

/// What a control dispatch asks of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlOutcome {
    Continue,
    /// The instance asked to be retired; the pipeline removes its registry
    /// entry, which drops this object.
    Retire,
}

/// The worker-side half of one engine instance.
///
/// Owns the compiled analysis kernel and the worker ends of the shared
/// region. Created only after the module instantiated successfully; its
/// registry entry is the sole owner.
pub struct ProcessorInstance {
    handle: Handle,
    kernel: Box<dyn AnalysisKernel>,
    samples: Consumer<AudioQuantum>,
    frames: Producer<SpectrumFrame>,
    shared: Arc<NodeShared>,
}

impl ProcessorInstance {
    pub(crate) fn new(
        handle: Handle,
        kernel: Box<dyn AnalysisKernel>,
        region: SharedRegion,
    ) -> Self {
        ProcessorInstance {
            handle,
            kernel,
            samples: region.samples,
            frames: region.frames,
            shared: region.shared,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Marks the instance ready for the realtime side. Called exactly once,
    /// after registration, before the queued messages are replayed.
    pub(crate) fn activate(&self) {
        self.shared.ready.store(true, Ordering::Release);
    }

    /// Drains queued input blocks into the kernel and publishes any due
    /// frames. A full frame ring means the realtime side has not drained
    /// yet; the superseded frame is dropped, never waited on.
    pub(crate) fn pump(&mut self) {
        while let Some(quantum) = self.samples.pop() {
            self.kernel.ingest(&quantum.samples);
        }
        while let Some(frame) = self.kernel.poll_frame() {
            if self.frames.push(frame).is_err() {
                log::trace!("instance {}: frame ring full, result dropped", self.handle);
            }
        }
    }

    pub(crate) fn on_control(&mut self, op: &ControlOp) -> ControlOutcome {
        match op {
            ControlOp::SetGainTarget(v) => self.shared.gain_target.set(*v),
            ControlOp::SetMonitorGain(v) => self.shared.monitor_gain.set(*v),
            ControlOp::Reset => self.kernel.reset(),
            ControlOp::Retire => {
                self.shared.alive.store(false, Ordering::Relaxed);
                return ControlOutcome::Retire;
            }
            // Everything else belongs to the kernel.
            other => self.kernel.control(other),
        }
        ControlOutcome::Continue
    }
}
