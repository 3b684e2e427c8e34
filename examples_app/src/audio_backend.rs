use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::FromSample;
use quantadsp_core::core::quantum::{AudioQuantum, QUANTUM_FRAMES};
use quantadsp_core::engine::AnalyzerNode;
use quantadsp_core::QuantumProcessor;
use std::sync::{Arc, Mutex};

/// Drives an [`AnalyzerNode`] from an arbitrarily-sized capture callback by
/// re-blocking the first channel into audio quanta.
pub struct CaptureDriver {
    node: AnalyzerNode,
    pending: Vec<f32>,
    sample_index: u64,
}

impl CaptureDriver {
    pub fn new(node: AnalyzerNode) -> Self {
        CaptureDriver {
            node,
            pending: Vec::with_capacity(QUANTUM_FRAMES * 4),
            sample_index: 0,
        }
    }

    pub fn node(&self) -> &AnalyzerNode {
        &self.node
    }

    pub fn on_samples(&mut self, interleaved: &[f32], channels: usize) {
        for frame in interleaved.chunks(channels.max(1)) {
            self.pending.push(frame[0]);
        }
        while self.pending.len() >= QUANTUM_FRAMES {
            let input = AudioQuantum::from_slice(&self.pending[..QUANTUM_FRAMES]);
            self.pending.drain(..QUANTUM_FRAMES);

            let mut output = AudioQuantum::silence();
            self.node
                .process(Some(&input), &mut output, self.sample_index);
            self.sample_index += QUANTUM_FRAMES as u64;
        }
    }
}

/// Queries the default input device's sample rate, for sizing the node
/// before the stream exists.
pub fn default_input_rate() -> Result<f32> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No input device available"))?;
    let config = device.default_input_config()?;
    Ok(config.sample_rate() as f32)
}

/// Opens a capture stream on the default input device and feeds the driver.
pub fn init_capture(driver: Arc<Mutex<CaptureDriver>>) -> Result<(cpal::Stream, f32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No input device available"))?;
    let config = device.default_input_config()?;
    let sample_rate = config.sample_rate() as f32;

    let err_fn = |err| eprintln!("an error occurred on stream: {}", err);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => run_capture::<f32>(&device, &config.into(), driver, err_fn)?,
        cpal::SampleFormat::I16 => run_capture::<i16>(&device, &config.into(), driver, err_fn)?,
        cpal::SampleFormat::U16 => run_capture::<u16>(&device, &config.into(), driver, err_fn)?,
        _ => return Err(anyhow::anyhow!("Unsupported sample format")),
    };

    Ok((stream, sample_rate))
}

fn run_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    driver: Arc<Mutex<CaptureDriver>>,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels as usize;
    let mut convert_buffer = vec![0.0f32; 1024];

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if convert_buffer.len() < data.len() {
                convert_buffer.resize(data.len(), 0.0);
            }
            for (slot, sample) in convert_buffer.iter_mut().zip(data.iter()) {
                *slot = f32::from_sample(*sample);
            }

            let mut driver = driver.lock().unwrap();
            driver.on_samples(&convert_buffer[..data.len()], channels);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
