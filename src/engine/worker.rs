use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::engine::error::{FaultReport, InitFault, ModuleError, SubmitError};
use crate::engine::instance::{ControlOutcome, ProcessorInstance};
use crate::engine::lifecycle::{LifecycleController, LifecycleState, SubmitAction};
use crate::engine::message::{
    ControlMessage, ControlOp, Handle, InitPayload, SharedRegion, Submission,
};
use crate::engine::module::{AnalysisKernel, ComputeModule};
use crate::engine::node::NodeBuilder;
use crate::engine::registry::HandleRegistry;

const SUBMIT_QUEUE: usize = 1024;
const FAULT_QUEUE: usize = 32;
/// Ready instances are pumped at least this often even when no messages
/// arrive; well under one block period.
const PUMP_INTERVAL: Duration = Duration::from_millis(1);

/// Completion of one asynchronous instantiation.
struct Instantiated {
    handle: Handle,
    region: SharedRegion,
    result: Result<Box<dyn AnalysisKernel>, ModuleError>,
}

/// The off-thread half of the engine.
///
/// Owns the worker thread running the single-consumer message loop. Handles
/// cross the boundary as plain integers; the registry and all instances stay
/// confined to the worker. Dropping the pipeline shuts the loop down and
/// joins the thread.
pub struct Pipeline {
    submit_tx: Option<Sender<Submission>>,
    fault_rx: Receiver<FaultReport>,
    next_handle: AtomicU32,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Starts the worker thread with the given compute module.
    pub fn spawn<M: ComputeModule>(module: M) -> std::io::Result<Pipeline> {
        let (submit_tx, submit_rx) = bounded(SUBMIT_QUEUE);
        let (fault_tx, fault_rx) = bounded(FAULT_QUEUE);
        let module: Arc<dyn ComputeModule> = Arc::new(module);

        let worker = thread::Builder::new()
            .name("quantadsp-worker".into())
            .spawn(move || run(module, submit_rx, fault_tx))?;

        Ok(Pipeline {
            submit_tx: Some(submit_tx),
            fault_rx,
            next_handle: AtomicU32::new(1),
            worker: Some(worker),
        })
    }

    /// Starts building a node/payload pair under a freshly allocated handle.
    pub fn node_builder(&self, sample_rate: f32) -> NodeBuilder {
        let handle = Handle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        NodeBuilder::new(handle, sample_rate)
    }

    /// Submits an init payload or control message to the worker. Never
    /// blocks; a full queue is reported as backpressure.
    pub fn submit(&self, submission: Submission) -> Result<(), SubmitError> {
        let tx = self.submit_tx.as_ref().ok_or(SubmitError::Closed)?;
        tx.try_send(submission).map_err(|err| match err {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }

    /// Convenience wrapper for a steady-state control message.
    pub fn control(&self, handle: Handle, op: ControlOp) -> Result<(), SubmitError> {
        self.submit(Submission::Control(ControlMessage { handle, op }))
    }

    /// Initialization faults are delivered here, once per failed instance.
    pub fn faults(&self) -> &Receiver<FaultReport> {
        &self.fault_rx
    }

    /// Stops the worker and joins it. Equivalent to dropping the pipeline.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        self.submit_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("worker thread terminated with a panic");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

struct WorkerState {
    module: Arc<dyn ComputeModule>,
    registry: HandleRegistry<ProcessorInstance>,
    lifecycles: HashMap<Handle, LifecycleController>,
    done_tx: Sender<Instantiated>,
    fault_tx: Sender<FaultReport>,
}

fn run(
    module: Arc<dyn ComputeModule>,
    submit_rx: Receiver<Submission>,
    fault_tx: Sender<FaultReport>,
) {
    let (done_tx, done_rx) = bounded(SUBMIT_QUEUE);
    let mut state = WorkerState {
        module,
        registry: HandleRegistry::new(),
        lifecycles: HashMap::new(),
        done_tx,
        fault_tx,
    };

    info!("worker pipeline up");
    loop {
        // Completion events first: readiness unblocks queued messages.
        while let Ok(done) = done_rx.try_recv() {
            state.finish_instantiation(done);
        }
        match submit_rx.recv_timeout(PUMP_INTERVAL) {
            Ok(submission) => state.handle_submission(submission),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        state.pump_all();
    }

    // Let in-flight instantiations settle so their threads can finish.
    while state.initializing_count() > 0 {
        match done_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(done) => state.finish_instantiation(done),
            Err(_) => {
                warn!("shutting down with instantiation still in flight");
                break;
            }
        }
    }
    state.registry.clear();
    info!("worker pipeline down");
}

impl WorkerState {
    fn handle_submission(&mut self, submission: Submission) {
        match submission {
            Submission::Init(payload) => {
                let handle = payload.handle();
                if self.registry.contains(handle) {
                    self.report_fault(handle, InitFault::AlreadyInitialized);
                    return;
                }
                let controller = self.lifecycles.entry(handle).or_default();
                match controller.submit(Submission::Init(payload)) {
                    SubmitAction::Begin(payload) => self.begin_instantiation(payload),
                    SubmitAction::DuplicateInit(_) => {
                        self.report_fault(handle, InitFault::AlreadyInitialized)
                    }
                    _ => {}
                }
            }
            Submission::Control(msg) => self.handle_control(msg),
        }
    }

    fn handle_control(&mut self, msg: ControlMessage) {
        if let Some(controller) = self.lifecycles.get_mut(&msg.handle) {
            match controller.submit(Submission::Control(msg)) {
                SubmitAction::Queued => {}
                SubmitAction::Dropped(msg) => {
                    warn!(
                        "instance {} failed to initialize, dropping {:?}",
                        msg.handle, msg.op
                    );
                }
                SubmitAction::Dispatch(msg) => self.dispatch(msg),
                _ => {}
            }
            return;
        }
        self.dispatch(msg);
    }

    fn dispatch(&mut self, msg: ControlMessage) {
        match self.registry.resolve_mut(msg.handle) {
            Ok(instance) => {
                if instance.on_control(&msg.op) == ControlOutcome::Retire {
                    self.registry.retire(msg.handle);
                    info!("instance {} retired", msg.handle);
                }
            }
            // The target has legitimately retired; drop and keep going.
            Err(err) => warn!("dropping {:?}: {}", msg.op, err),
        }
    }

    fn begin_instantiation(&mut self, payload: InitPayload) {
        let handle = payload.handle();
        let module = self.module.clone();
        let done_tx = self.done_tx.clone();
        debug!("instantiating {}", handle);

        // Instantiation may suspend (module fetch/compile); it gets its own
        // thread and reports back through the completion channel.
        let spawned = thread::Builder::new()
            .name(format!("quantadsp-init-{}", handle.0))
            .spawn(move || {
                let InitPayload {
                    image,
                    region,
                    handle,
                } = payload;
                let result = module.instantiate(&image);
                let _ = done_tx.send(Instantiated {
                    handle,
                    region,
                    result,
                });
            });

        if spawned.is_err() {
            if let Some(controller) = self.lifecycles.get_mut(&handle) {
                let dropped = controller.complete(false);
                if !dropped.is_empty() {
                    warn!(
                        "instance {}: dropping {} queued messages",
                        handle,
                        dropped.len()
                    );
                }
            }
            self.report_fault(handle, InitFault::SpawnFailed);
        }
    }

    fn finish_instantiation(&mut self, done: Instantiated) {
        let Instantiated {
            handle,
            region,
            result,
        } = done;
        let Some(mut controller) = self.lifecycles.remove(&handle) else {
            warn!("completion event for unknown instance {}", handle);
            return;
        };

        match result {
            Ok(kernel) => {
                let instance = ProcessorInstance::new(handle, kernel, region);
                if let Err(err) = self.registry.register(handle, instance) {
                    // Two live instances behind one handle would corrupt
                    // dispatch; this cannot be recovered from.
                    panic!("fatal registry corruption: {}", err);
                }
                if let Ok(instance) = self.registry.resolve(handle) {
                    instance.activate();
                }
                info!("instance {} ready", handle);

                let queued = controller.complete(true);
                if !queued.is_empty() {
                    debug!("replaying {} queued messages for {}", queued.len(), handle);
                }
                for msg in queued {
                    self.dispatch(msg);
                }
            }
            Err(err) => {
                let dropped = controller.complete(false);
                if !dropped.is_empty() {
                    warn!(
                        "instance {}: dropping {} queued messages after fault",
                        handle,
                        dropped.len()
                    );
                }
                // Terminal: keep the failed controller so later messages for
                // this handle are recognizably dead, not merely unknown.
                self.lifecycles.insert(handle, controller);
                self.report_fault(handle, InitFault::Module(err));
            }
        }
    }

    fn pump_all(&mut self) {
        for instance in self.registry.instances_mut() {
            instance.pump();
        }
    }

    fn initializing_count(&self) -> usize {
        self.lifecycles
            .values()
            .filter(|c| c.state() == LifecycleState::Initializing)
            .count()
    }

    fn report_fault(&self, handle: Handle, fault: InitFault) {
        error!("initialization fault on {}: {}", handle, fault);
        if self.fault_tx.try_send(FaultReport { handle, fault }).is_err() {
            warn!("fault channel unavailable, report for {} dropped", handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame_processor::QuantumProcessor;
    use crate::core::quantum::AudioQuantum;
    use crate::engine::message::ModuleImage;
    use crate::spectral::module::SpectralModule;
    use crate::spectral::spectrum::SpectrumFrame;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting on condition");
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Records every control op that reaches the kernel.
    struct RecordingKernel {
        ops: Arc<Mutex<Vec<ControlOp>>>,
    }

    impl AnalysisKernel for RecordingKernel {
        fn ingest(&mut self, _samples: &[f32]) {}

        fn poll_frame(&mut self) -> Option<SpectrumFrame> {
            None
        }

        fn control(&mut self, op: &ControlOp) {
            self.ops.lock().unwrap().push(*op);
        }

        fn reset(&mut self) {
            self.ops.lock().unwrap().push(ControlOp::Reset);
        }
    }

    /// Instantiation blocks until the gate sender is used or dropped.
    struct GatedModule {
        gate: Receiver<()>,
        ops: Arc<Mutex<Vec<ControlOp>>>,
    }

    impl GatedModule {
        fn gated() -> (Self, Sender<()>, Arc<Mutex<Vec<ControlOp>>>) {
            let (gate_tx, gate_rx) = bounded(1);
            let ops = Arc::new(Mutex::new(Vec::new()));
            (
                GatedModule {
                    gate: gate_rx,
                    ops: ops.clone(),
                },
                gate_tx,
                ops,
            )
        }

        fn open() -> (Self, Arc<Mutex<Vec<ControlOp>>>) {
            let (module, gate_tx, ops) = Self::gated();
            drop(gate_tx);
            (module, ops)
        }
    }

    impl ComputeModule for GatedModule {
        fn instantiate(
            &self,
            image: &ModuleImage,
        ) -> Result<Box<dyn AnalysisKernel>, ModuleError> {
            let _ = self.gate.recv();
            if image.version != ModuleImage::CURRENT_VERSION {
                return Err(ModuleError::UnsupportedVersion(image.version));
            }
            Ok(Box::new(RecordingKernel {
                ops: self.ops.clone(),
            }))
        }
    }

    #[test]
    fn test_messages_before_ready_replay_in_order() {
        let (module, gate_tx, ops) = GatedModule::gated();
        let pipeline = Pipeline::spawn(module).unwrap();
        let (node, payload) = pipeline.node_builder(48000.0).build();
        let handle = node.handle();

        pipeline.submit(Submission::Init(payload)).unwrap();
        for v in [0.1, 0.2, 0.3] {
            pipeline.control(handle, ControlOp::SetAveraging(v)).unwrap();
        }

        // Instantiation is still gated; nothing may reach the kernel yet.
        thread::sleep(Duration::from_millis(50));
        assert!(ops.lock().unwrap().is_empty());
        assert!(!node.is_ready());

        gate_tx.send(()).unwrap();
        wait_until(|| ops.lock().unwrap().len() == 3);

        let seen = ops.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ControlOp::SetAveraging(0.1),
                ControlOp::SetAveraging(0.2),
                ControlOp::SetAveraging(0.3),
            ]
        );
        wait_until(|| node.is_ready());
    }

    #[test]
    fn test_unknown_handle_is_dropped_without_crash() {
        let (module, ops) = GatedModule::open();
        let pipeline = Pipeline::spawn(module).unwrap();

        pipeline.control(Handle(99), ControlOp::Reset).unwrap();

        // The pipeline keeps serving real instances afterwards.
        let (node, payload) = pipeline.node_builder(48000.0).build();
        pipeline.submit(Submission::Init(payload)).unwrap();
        wait_until(|| node.is_ready());
        pipeline
            .control(node.handle(), ControlOp::SetAveraging(0.5))
            .unwrap();
        wait_until(|| !ops.lock().unwrap().is_empty());
    }

    #[test]
    fn test_retire_then_dispatch_continues() {
        let (module, ops) = GatedModule::open();
        let pipeline = Pipeline::spawn(module).unwrap();
        let (mut node, payload) = pipeline.node_builder(48000.0).build();
        let handle = node.handle();
        pipeline.submit(Submission::Init(payload)).unwrap();
        wait_until(|| node.is_ready());

        pipeline.control(handle, ControlOp::Retire).unwrap();
        // Dispatched after retirement: dropped with a logged NotFound.
        pipeline.control(handle, ControlOp::SetAveraging(0.5)).unwrap();

        let mut output = AudioQuantum::silence();
        wait_until(|| !node.process(None, &mut output, 0));

        // Later instances are unaffected.
        let (second, payload) = pipeline.node_builder(48000.0).build();
        pipeline.submit(Submission::Init(payload)).unwrap();
        wait_until(|| second.is_ready());
        pipeline
            .control(second.handle(), ControlOp::Reset)
            .unwrap();
        wait_until(|| ops.lock().unwrap().contains(&ControlOp::Reset));
    }

    #[test]
    fn test_malformed_image_reports_fault() {
        let pipeline = Pipeline::spawn(SpectralModule).unwrap();
        let (node, payload) = pipeline.node_builder(48000.0).fft_size(1000).build();
        let handle = node.handle();

        pipeline.submit(Submission::Init(payload)).unwrap();
        let report = pipeline
            .faults()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(report.handle, handle);
        assert_eq!(
            report.fault,
            InitFault::Module(ModuleError::UnsupportedFftSize(1000))
        );
        assert!(!node.is_ready());

        // Terminal for the instance; later messages are dropped quietly.
        pipeline.control(handle, ControlOp::Reset).unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    #[test]
    fn test_second_init_reports_already_initialized() {
        let (module, _ops) = GatedModule::open();
        let pipeline = Pipeline::spawn(module).unwrap();
        let (node, payload) = pipeline.node_builder(48000.0).build();
        pipeline.submit(Submission::Init(payload)).unwrap();
        wait_until(|| node.is_ready());

        // A second payload under the same handle violates the single-shot
        // contract.
        let (_node2, payload2) = NodeBuilder::new(node.handle(), 48000.0).build();
        pipeline.submit(Submission::Init(payload2)).unwrap();

        let report = pipeline
            .faults()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(report.handle, node.handle());
        assert_eq!(report.fault, InitFault::AlreadyInitialized);
    }

    #[test]
    fn test_end_to_end_spectrum_flow() {
        let sample_rate = 48000.0;
        let pipeline = Pipeline::spawn(SpectralModule).unwrap();
        let (mut node, payload) = pipeline
            .node_builder(sample_rate)
            .fft_size(256)
            .averaging(0.0)
            .build();
        pipeline.submit(Submission::Init(payload)).unwrap();
        wait_until(|| node.is_ready());

        // Sine centered on bin 16 of 256.
        let freq = 16.0 * sample_rate / 256.0;
        let mut output = AudioQuantum::silence();
        let mut n = 0u64;
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let mut input = AudioQuantum::silence();
            for s in input.samples.iter_mut() {
                *s = libm::sinf(2.0 * core::f32::consts::PI * freq * n as f32 / sample_rate);
                n += 1;
            }
            assert!(node.process(Some(&input), &mut output, n));

            if node.latest_frame().map(|f| f.seq >= 3).unwrap_or(false) {
                break;
            }
            assert!(Instant::now() < deadline, "no spectrum frames arrived");
            thread::sleep(Duration::from_millis(1));
        }

        let frame = node.latest_frame().unwrap();
        assert!((frame.peak_hz - freq).abs() <= frame.bin_hz);
        assert!(frame.power > 0.2);
    }
}
