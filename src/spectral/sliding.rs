use num_complex::Complex32;

/// One sliding-DFT probe.
///
/// Keeps a ring of per-sample phasor contributions over its window together
/// with their running sum, so advancing by one sample is O(1): add the new
/// contribution, subtract the one falling out of the window. The running sum
/// is rebuilt from the ring once per wrap to cancel accumulated float error;
/// that rebuild is bounded by the window length, so the worst-case cost of an
/// `advance` call stays fixed.
pub struct ProbeBin {
    /// Per-sample rotation, `e^{-j 2 pi f / sr}`.
    step: Complex32,
    /// Current analysis phasor.
    phase: Complex32,
    window: Box<[Complex32]>,
    pos: usize,
    sum: Complex32,
    inv_len: f32,
    freq_hz: f32,
}

impl ProbeBin {
    /// Creates a probe at `freq_hz` with a window of `window_len` samples.
    pub fn new(freq_hz: f32, sample_rate: f32, window_len: usize) -> Self {
        let len = window_len.max(1);
        let w = -2.0 * core::f32::consts::PI * freq_hz / sample_rate;
        ProbeBin {
            step: Complex32::new(libm::cosf(w), libm::sinf(w)),
            phase: Complex32::new(1.0, 0.0),
            window: vec![Complex32::new(0.0, 0.0); len].into_boxed_slice(),
            pos: 0,
            sum: Complex32::new(0.0, 0.0),
            inv_len: 1.0 / len as f32,
            freq_hz,
        }
    }

    /// Window length derived from a resolution in wave cycles, with a shelf
    /// that keeps low-frequency windows from growing unbounded.
    pub fn window_size(cycles: f32, sample_rate: f32, freq_hz: f32, shelf_hz: f32) -> usize {
        let base = 16.0 + cycles * 4.0;
        (base + cycles * sample_rate / (shelf_hz + freq_hz)) as usize
    }

    pub fn frequency(&self) -> f32 {
        self.freq_hz
    }

    #[inline]
    pub fn advance(&mut self, sample: f32) {
        let contrib = self.phase.scale(sample);
        self.sum = self.sum + contrib - self.window[self.pos];
        self.window[self.pos] = contrib;
        self.pos += 1;
        if self.pos == self.window.len() {
            self.pos = 0;
            self.renormalize();
        }
        self.phase *= self.step;
    }

    /// Magnitude of the windowed bin, normalized so a full-scale sine at the
    /// probe frequency reads ~1.0.
    pub fn magnitude(&self) -> f32 {
        self.sum.norm() * 2.0 * self.inv_len
    }

    pub fn reset(&mut self) {
        self.window.fill(Complex32::new(0.0, 0.0));
        self.sum = Complex32::new(0.0, 0.0);
        self.phase = Complex32::new(1.0, 0.0);
        self.pos = 0;
    }

    fn renormalize(&mut self) {
        let n = self.phase.norm();
        if n > 0.0 {
            self.phase = self.phase.scale(1.0 / n);
        }
        let mut sum = Complex32::new(0.0, 0.0);
        for c in self.window.iter() {
            sum += *c;
        }
        self.sum = sum;
    }
}

/// A bank of sliding-DFT probes at log-spaced frequencies.
///
/// Suitable for the realtime path: construction allocates, `advance_block`
/// and `magnitudes_into` never do.
pub struct SlidingDft {
    bins: Vec<ProbeBin>,
}

impl SlidingDft {
    /// Builds `count` probes log-spaced between `lo_hz` and `hi_hz`.
    pub fn log_spaced(count: usize, lo_hz: f32, hi_hz: f32, sample_rate: f32, cycles: f32) -> Self {
        let mut bins = Vec::with_capacity(count);
        for i in 0..count {
            let t = if count > 1 {
                i as f32 / (count - 1) as f32
            } else {
                0.0
            };
            let freq = lo_hz * libm::powf(hi_hz / lo_hz, t);
            let len = ProbeBin::window_size(cycles, sample_rate, freq, lo_hz);
            bins.push(ProbeBin::new(freq, sample_rate, len));
        }
        SlidingDft { bins }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn bins(&self) -> &[ProbeBin] {
        &self.bins
    }

    /// Advances every probe over one block of samples.
    pub fn advance_block(&mut self, samples: &[f32]) {
        for bin in self.bins.iter_mut() {
            for &s in samples {
                bin.advance(s);
            }
        }
    }

    /// Writes each probe's magnitude into `out`, truncating to the shorter
    /// of the two lengths.
    pub fn magnitudes_into(&self, out: &mut [f32]) {
        for (slot, bin) in out.iter_mut().zip(self.bins.iter()) {
            *slot = bin.magnitude();
        }
    }

    pub fn reset(&mut self) {
        for bin in self.bins.iter_mut() {
            bin.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_sine(bank: &mut SlidingDft, freq: f32, sample_rate: f32, blocks: usize) {
        let mut buf = [0.0f32; 128];
        let mut n = 0u64;
        for _ in 0..blocks {
            for s in buf.iter_mut() {
                *s = libm::sinf(2.0 * core::f32::consts::PI * freq * n as f32 / sample_rate);
                n += 1;
            }
            bank.advance_block(&buf);
        }
    }

    #[test]
    fn test_probe_tracks_matching_tone() {
        let sample_rate = 48000.0;
        let mut bank = SlidingDft::log_spaced(8, 100.0, 8000.0, sample_rate, 8.0);
        let target = bank.bins()[4].frequency();

        feed_sine(&mut bank, target, sample_rate, 200);

        let mut mags = [0.0f32; 8];
        bank.magnitudes_into(&mut mags);

        // The matching probe reads near full scale, the ends read low.
        assert!(mags[4] > 0.7, "mags: {:?}", mags);
        assert!(mags[0] < 0.2);
        assert!(mags[7] < 0.2);
    }

    #[test]
    fn test_silence_reads_zero() {
        let mut bank = SlidingDft::log_spaced(4, 100.0, 4000.0, 48000.0, 8.0);
        let silence = [0.0f32; 128];
        for _ in 0..100 {
            bank.advance_block(&silence);
        }
        let mut mags = [0.0f32; 4];
        bank.magnitudes_into(&mut mags);
        for m in mags {
            assert!(m < 1e-3);
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let sample_rate = 48000.0;
        let mut bank = SlidingDft::log_spaced(4, 100.0, 4000.0, sample_rate, 8.0);
        feed_sine(&mut bank, 1000.0, sample_rate, 50);
        bank.reset();

        let mut mags = [1.0f32; 4];
        bank.magnitudes_into(&mut mags);
        for m in mags {
            assert_eq!(m, 0.0);
        }
    }
}
