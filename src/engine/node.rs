use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use wide::f32x4;

use crate::core::frame_processor::QuantumProcessor;
use crate::core::parameter::Parameter;
use crate::core::quantum::AudioQuantum;
use crate::core::ring::{ring_channel, Consumer, Producer};
use crate::engine::message::{Handle, InitPayload, ModuleImage, SharedRegion};
use crate::spectral::sliding::SlidingDft;
use crate::spectral::spectrum::SpectrumFrame;

/// Upper bound for the adaptive monitor gain.
const MAX_AUTO_GAIN: f32 = 16.0;
/// Per-block smoothing toward the desired gain.
const GAIN_SLEW: f32 = 0.05;

/// The atomics shared between one realtime node and its worker-side
/// instance. The only mutable state crossing the boundary outside the rings.
pub struct NodeShared {
    /// Set exactly once, after the instance's init payload has been applied.
    pub(crate) ready: AtomicBool,
    pub(crate) alive: AtomicBool,
    /// Input blocks rejected because the sample ring was full.
    pub(crate) dropped_blocks: AtomicU64,
    /// RMS level the adaptive gain steers toward; `0.0` disables it.
    pub gain_target: Parameter,
    /// Fixed gain applied after the adaptive stage.
    pub monitor_gain: Parameter,
}

impl NodeShared {
    fn new(gain_target: f32) -> Self {
        NodeShared {
            ready: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            dropped_blocks: AtomicU64::new(0),
            gain_target: Parameter::new(gain_target),
            monitor_gain: Parameter::new(1.0),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

/// One-pole DC blocking filter, `y[n] = x[n] - x[n-1] + R y[n-1]`.
struct DcBlocker {
    r: f32,
    x1: f32,
    y1: f32,
}

impl DcBlocker {
    fn new() -> Self {
        DcBlocker {
            r: 0.995,
            x1: 0.0,
            y1: 0.0,
        }
    }

    #[inline]
    fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        let mut x1 = self.x1;
        let mut y1 = self.y1;
        for (o, &x) in output.iter_mut().zip(input.iter()) {
            let y = x - x1 + self.r * y1;
            x1 = x;
            y1 = y;
            *o = y;
        }
        self.x1 = x1;
        self.y1 = y1;
    }
}

fn scale_block(buffer: &mut [f32], gain: f32) {
    let gain_vec = f32x4::splat(gain);
    let (chunks, remainder) = buffer.as_chunks_mut::<4>();

    for chunk in chunks {
        let vec = f32x4::from(*chunk);
        *chunk = (vec * gain_vec).to_array();
    }
    for sample in remainder {
        *sample *= gain;
    }
}

/// The realtime half of one engine instance.
///
/// Owned by the host's audio graph and driven once per render quantum. All
/// work on the `process` path is allocation-free and lock-free: the sliding
/// probe bank advances in place, spectrum results arrive through the frame
/// ring, raw input leaves through the sample ring (reject-on-full; rejected
/// blocks are counted, never waited on).
pub struct AnalyzerNode {
    handle: Handle,
    shared: Arc<NodeShared>,
    samples: Producer<AudioQuantum>,
    frames: Consumer<SpectrumFrame>,

    probes: SlidingDft,
    probe_mags: Vec<f32>,
    latest: SpectrumFrame,
    has_frame: bool,
    dc: DcBlocker,
    gain: f32,
    sample_rate: f32,
}

impl AnalyzerNode {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// The most recent spectrum frame published by the worker, if any.
    pub fn latest_frame(&self) -> Option<&SpectrumFrame> {
        self.has_frame.then_some(&self.latest)
    }

    /// Probe magnitudes as of the last processed block.
    pub fn probe_magnitudes(&self) -> &[f32] {
        &self.probe_mags
    }

    /// Center frequencies of the probe bank.
    pub fn probe_frequency(&self, index: usize) -> Option<f32> {
        self.probes.bins().get(index).map(|b| b.frequency())
    }

    /// Input blocks rejected so far because the sample ring was full.
    pub fn dropped_blocks(&self) -> u64 {
        self.shared.dropped_blocks.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<NodeShared> {
        &self.shared
    }
}

impl QuantumProcessor for AnalyzerNode {
    fn process(
        &mut self,
        input: Option<&AudioQuantum>,
        output: &mut AudioQuantum,
        _sample_index: u64,
    ) -> bool {
        if !self.shared.alive.load(Ordering::Relaxed) {
            *output = AudioQuantum::silence();
            return false;
        }
        if !self.shared.ready.load(Ordering::Acquire) {
            *output = AudioQuantum::silence();
            return true;
        }

        // Keep only the freshest frame; stale ones are superseded.
        while let Some(frame) = self.frames.pop() {
            self.latest = frame;
            self.has_frame = true;
        }

        let input = match input {
            Some(input) => input,
            None => {
                // Upstream disconnected; nothing to analyze.
                *output = AudioQuantum::silence();
                return true;
            }
        };

        self.probes.advance_block(&input.samples);
        self.probes.magnitudes_into(&mut self.probe_mags);

        let target = self.shared.gain_target.get();
        let desired = if target > 0.0 && self.has_frame {
            (target / libm::sqrtf(self.latest.power.max(1e-8))).clamp(0.0, MAX_AUTO_GAIN)
        } else {
            1.0
        };
        self.gain += (desired - self.gain) * GAIN_SLEW;

        self.dc.process_block(&input.samples, &mut output.samples);
        scale_block(&mut output.samples, self.gain * self.shared.monitor_gain.get());

        if self.samples.push(*input).is_err() {
            self.shared.dropped_blocks.fetch_add(1, Ordering::Relaxed);
        }

        true
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }
}

/// Builds the two halves of one engine instance: the realtime node and the
/// init payload the host submits to the worker pipeline.
pub struct NodeBuilder {
    handle: Handle,
    sample_rate: f32,
    fft_size: u32,
    averaging: f32,
    probe_count: usize,
    probe_lo_hz: f32,
    probe_hi_hz: f32,
    probe_cycles: f32,
    sample_ring: usize,
    frame_ring: usize,
    gain_target: f32,
}

impl NodeBuilder {
    pub fn new(handle: Handle, sample_rate: f32) -> Self {
        NodeBuilder {
            handle,
            sample_rate,
            fft_size: 1024,
            averaging: 0.8,
            probe_count: 16,
            probe_lo_hz: 55.0,
            probe_hi_hz: 16000.0,
            probe_cycles: 8.0,
            sample_ring: 64,
            frame_ring: 4,
            gain_target: 0.0,
        }
    }

    /// FFT size for the worker-side aggregation; must be one of the sizes
    /// the compute module supports or instantiation faults.
    pub fn fft_size(mut self, fft_size: u32) -> Self {
        self.fft_size = fft_size;
        self
    }

    /// Spectrum averaging factor, `0.0..1.0`.
    pub fn averaging(mut self, averaging: f32) -> Self {
        self.averaging = averaging;
        self
    }

    /// Realtime probe bank layout.
    pub fn probes(mut self, count: usize, lo_hz: f32, hi_hz: f32) -> Self {
        self.probe_count = count;
        self.probe_lo_hz = lo_hz;
        self.probe_hi_hz = hi_hz;
        self
    }

    /// Ring capacities in blocks/frames.
    pub fn ring_capacity(mut self, sample_blocks: usize, spectrum_frames: usize) -> Self {
        self.sample_ring = sample_blocks;
        self.frame_ring = spectrum_frames;
        self
    }

    /// Enables adaptive monitor gain toward the given RMS target.
    pub fn gain_target(mut self, target: f32) -> Self {
        self.gain_target = target;
        self
    }

    pub fn build(self) -> (AnalyzerNode, InitPayload) {
        let (sample_tx, sample_rx) = ring_channel(self.sample_ring);
        let (frame_tx, frame_rx) = ring_channel(self.frame_ring);
        let shared = Arc::new(NodeShared::new(self.gain_target));

        let hi = self.probe_hi_hz.min(self.sample_rate * 0.45);
        let node = AnalyzerNode {
            handle: self.handle,
            shared: shared.clone(),
            samples: sample_tx,
            frames: frame_rx,
            probes: SlidingDft::log_spaced(
                self.probe_count,
                self.probe_lo_hz,
                hi,
                self.sample_rate,
                self.probe_cycles,
            ),
            probe_mags: vec![0.0; self.probe_count],
            latest: SpectrumFrame::empty(),
            has_frame: false,
            dc: DcBlocker::new(),
            gain: 1.0,
            sample_rate: self.sample_rate,
        };

        let payload = InitPayload {
            image: ModuleImage {
                version: ModuleImage::CURRENT_VERSION,
                sample_rate: self.sample_rate,
                fft_size: self.fft_size,
                averaging: self.averaging,
            },
            region: SharedRegion {
                samples: sample_rx,
                frames: frame_tx,
                shared,
            },
            handle: self.handle,
        };

        (node, payload)
    }
}
