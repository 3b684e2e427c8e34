use num_complex::Complex32;
use wide::f32x4;

/// Bin capacity of a [`SpectrumFrame`], half the largest supported FFT.
pub const MAX_SPECTRUM_BINS: usize = 1024;

/// One aggregated spectrum result, published worker-side and consumed on the
/// realtime thread. `Copy` and fixed-size so it can travel through the ring.
#[derive(Clone, Copy)]
pub struct SpectrumFrame {
    /// Averaged bin magnitudes; only the first `bin_count` entries are valid.
    pub bins: [f32; MAX_SPECTRUM_BINS],
    pub bin_count: usize,
    /// Width of one bin in Hz.
    pub bin_hz: f32,
    /// Mean square of the analysis window, time domain.
    pub power: f32,
    /// Frequency of the strongest non-DC bin.
    pub peak_hz: f32,
    /// Monotonic frame counter, starts at 1.
    pub seq: u64,
}

impl SpectrumFrame {
    pub const fn empty() -> Self {
        SpectrumFrame {
            bins: [0.0; MAX_SPECTRUM_BINS],
            bin_count: 0,
            bin_hz: 0.0,
            power: 0.0,
            peak_hz: 0.0,
            seq: 0,
        }
    }

    /// The valid bins.
    pub fn bins(&self) -> &[f32] {
        &self.bins[..self.bin_count]
    }
}

impl Default for SpectrumFrame {
    fn default() -> Self {
        Self::empty()
    }
}

/// Supported FFT sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FftSize {
    N256,
    N512,
    N1024,
    N2048,
}

impl FftSize {
    pub fn from_usize(n: usize) -> Option<Self> {
        match n {
            256 => Some(FftSize::N256),
            512 => Some(FftSize::N512),
            1024 => Some(FftSize::N1024),
            2048 => Some(FftSize::N2048),
            _ => None,
        }
    }

    pub fn as_usize(self) -> usize {
        match self {
            FftSize::N256 => 256,
            FftSize::N512 => 512,
            FftSize::N1024 => 1024,
            FftSize::N2048 => 2048,
        }
    }

    /// In-place forward FFT, dispatched to the matching fixed-size kernel.
    /// `buf` must be exactly `as_usize()` long.
    fn forward(self, buf: &mut [Complex32]) {
        debug_assert_eq!(buf.len(), self.as_usize());
        match self {
            FftSize::N256 => {
                if let Ok(b) = <&mut [Complex32; 256]>::try_from(buf) {
                    let _ = microfft::complex::cfft_256(b);
                }
            }
            FftSize::N512 => {
                if let Ok(b) = <&mut [Complex32; 512]>::try_from(buf) {
                    let _ = microfft::complex::cfft_512(b);
                }
            }
            FftSize::N1024 => {
                if let Ok(b) = <&mut [Complex32; 1024]>::try_from(buf) {
                    let _ = microfft::complex::cfft_1024(b);
                }
            }
            FftSize::N2048 => {
                if let Ok(b) = <&mut [Complex32; 2048]>::try_from(buf) {
                    let _ = microfft::complex::cfft_2048(b);
                }
            }
        }
    }
}

/// Windowed-FFT spectrum aggregator.
///
/// Collects samples into a history ring, and every half-window hop produces a
/// Hann-windowed magnitude spectrum folded into an exponential average. This
/// is the heavy half of the engine; it runs on the worker thread only.
pub struct SpectrumAnalyzer {
    sample_rate: f32,
    fft_size: FftSize,
    /// Exponential averaging factor, 0.0 = no smoothing.
    averaging: f32,

    window: Vec<f32>,
    history: Vec<f32>,
    write_pos: usize,
    total_written: u64,
    pending: usize,
    hop: usize,

    time_buf: Vec<f32>,
    fft_buf: Vec<Complex32>,
    avg_bins: Vec<f32>,
    seq: u64,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: f32, fft_size: FftSize, averaging: f32) -> Self {
        let n = fft_size.as_usize();
        let mut window = Vec::with_capacity(n);
        for i in 0..n {
            let phase = 2.0 * core::f32::consts::PI * i as f32 / n as f32;
            window.push(0.5 * (1.0 - libm::cosf(phase)));
        }

        SpectrumAnalyzer {
            sample_rate,
            fft_size,
            averaging: averaging.clamp(0.0, 0.999),
            window,
            history: vec![0.0; n],
            write_pos: 0,
            total_written: 0,
            pending: 0,
            hop: n / 2,
            time_buf: vec![0.0; n],
            fft_buf: vec![Complex32::new(0.0, 0.0); n],
            avg_bins: vec![0.0; n / 2],
            seq: 0,
        }
    }

    pub fn fft_size(&self) -> FftSize {
        self.fft_size
    }

    pub fn set_averaging(&mut self, averaging: f32) {
        self.averaging = averaging.clamp(0.0, 0.999);
    }

    /// Appends raw samples to the history ring.
    pub fn ingest(&mut self, samples: &[f32]) {
        let n = self.history.len();
        for &s in samples {
            self.history[self.write_pos] = s;
            self.write_pos += 1;
            if self.write_pos == n {
                self.write_pos = 0;
            }
        }
        self.total_written += samples.len() as u64;
        self.pending += samples.len();
    }

    /// Produces the next due frame, or `None` until a full hop of new samples
    /// has arrived and the history covers one window.
    pub fn poll_frame(&mut self) -> Option<SpectrumFrame> {
        let n = self.history.len();
        if self.total_written < n as u64 || self.pending < self.hop {
            return None;
        }
        self.pending -= self.hop;

        // Unroll the ring into time order, oldest first.
        for (i, slot) in self.time_buf.iter_mut().enumerate() {
            *slot = self.history[(self.write_pos + i) % n];
        }

        let power = mean_square(&self.time_buf);

        for i in 0..n {
            self.fft_buf[i] = Complex32::new(self.time_buf[i] * self.window[i], 0.0);
        }
        self.fft_size.forward(&mut self.fft_buf);

        let scale = 2.0 / n as f32;
        let keep = 1.0 - self.averaging;
        for (avg, bin) in self.avg_bins.iter_mut().zip(self.fft_buf.iter()) {
            let mag = bin.norm() * scale;
            *avg += (mag - *avg) * keep;
        }

        let mut peak_bin = 1;
        let mut peak_mag = 0.0f32;
        for (k, &m) in self.avg_bins.iter().enumerate().skip(1) {
            if m > peak_mag {
                peak_mag = m;
                peak_bin = k;
            }
        }

        self.seq += 1;
        let mut frame = SpectrumFrame::empty();
        let bins = self.avg_bins.len();
        frame.bins[..bins].copy_from_slice(&self.avg_bins);
        frame.bin_count = bins;
        frame.bin_hz = self.sample_rate / n as f32;
        frame.power = power;
        frame.peak_hz = peak_bin as f32 * self.sample_rate / n as f32;
        frame.seq = self.seq;
        Some(frame)
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.avg_bins.fill(0.0);
        self.write_pos = 0;
        self.total_written = 0;
        self.pending = 0;
        self.seq = 0;
    }
}

fn mean_square(samples: &[f32]) -> f32 {
    let (chunks, remainder) = samples.as_chunks::<4>();

    let mut acc = f32x4::splat(0.0);
    for chunk in chunks {
        let v = f32x4::from(*chunk);
        acc += v * v;
    }

    let lanes = acc.to_array();
    let mut sum = lanes[0] + lanes[1] + lanes[2] + lanes[3];
    for &s in remainder {
        sum += s * s;
    }
    sum / samples.len().max(1) as f32
}
