use anyhow::Result;
use cpal::traits::StreamTrait;
use quantadsp_core::engine::{ControlOp, Submission};
use quantadsp_core::spectral::module::SpectralModule;
use quantadsp_core::Pipeline;
use quantadsp_examples::audio_backend::{default_input_rate, init_capture, CaptureDriver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const BAR_CHARS: &[u8] = b" .:-=+*#%@";

fn bar(magnitude: f32) -> char {
    let db = 20.0 * libm::log10f(magnitude.max(1e-5));
    let level = ((db + 60.0) / 60.0 * (BAR_CHARS.len() - 1) as f32)
        .clamp(0.0, (BAR_CHARS.len() - 1) as f32) as usize;
    BAR_CHARS[level] as char
}

fn main() -> Result<()> {
    env_logger::init();

    let sample_rate = default_input_rate()?;
    let pipeline = Pipeline::spawn(SpectralModule)?;

    let (node, payload) = pipeline
        .node_builder(sample_rate)
        .fft_size(1024)
        .averaging(0.85)
        .probes(24, 55.0, 16000.0)
        .build();
    let handle = node.handle();
    pipeline.submit(Submission::Init(payload))?;

    let driver = Arc::new(Mutex::new(CaptureDriver::new(node)));
    let (stream, rate) = init_capture(driver.clone())?;
    stream.play()?;

    println!("Monitoring default input at {}Hz for 30s...", rate);

    for _ in 0..150 {
        thread::sleep(Duration::from_millis(200));

        let driver = driver.lock().unwrap();
        let node = driver.node();

        let mut line = String::with_capacity(32);
        for &m in node.probe_magnitudes() {
            line.push(bar(m));
        }
        match node.latest_frame() {
            Some(frame) => println!(
                "[{}] peak {:>7.1} Hz  power {:.5}  dropped {}",
                line,
                frame.peak_hz,
                frame.power,
                node.dropped_blocks()
            ),
            None => println!("[{}] (no spectrum yet)", line),
        }
    }

    pipeline.control(handle, ControlOp::Retire).ok();
    Ok(())
}
