use anyhow::Result;
use quantadsp_core::core::quantum::AudioQuantum;
use quantadsp_core::engine::Submission;
use quantadsp_core::spectral::module::SpectralModule;
use quantadsp_core::{Pipeline, QuantumProcessor};
use std::thread;
use std::time::{Duration, Instant};

const SAMPLE_RATE: f32 = 48000.0;
const SECONDS: u64 = 4;

fn main() -> Result<()> {
    env_logger::init();

    let pipeline = Pipeline::spawn(SpectralModule)?;
    let (mut node, payload) = pipeline
        .node_builder(SAMPLE_RATE)
        .fft_size(2048)
        .averaging(0.6)
        .gain_target(0.25)
        .build();
    pipeline.submit(Submission::Init(payload))?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while !node.is_ready() {
        anyhow::ensure!(Instant::now() < deadline, "module never became ready");
        thread::sleep(Duration::from_millis(1));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create("monitor.wav", spec)?;

    println!("Rendering {}s of a 440 + 2500 Hz two-tone...", SECONDS);

    let blocks = SECONDS * SAMPLE_RATE as u64 / 128;
    let mut n = 0u64;
    for block in 0..blocks {
        let mut input = AudioQuantum::silence();
        for s in input.samples.iter_mut() {
            let t = n as f32 / SAMPLE_RATE;
            *s = 0.4 * libm::sinf(2.0 * core::f32::consts::PI * 440.0 * t)
                + 0.2 * libm::sinf(2.0 * core::f32::consts::PI * 2500.0 * t);
            n += 1;
        }

        let mut output = AudioQuantum::silence();
        node.process(Some(&input), &mut output, block * 128);

        for &s in &output.samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }

        // Pace roughly like a realtime callback so the worker keeps up.
        thread::sleep(Duration::from_micros(500));
    }
    writer.finalize()?;

    match node.latest_frame() {
        Some(frame) => {
            println!(
                "spectrum #{}: peak {:.1} Hz, window power {:.5}",
                frame.seq, frame.peak_hz, frame.power
            );

            let mut top: Vec<(usize, f32)> =
                frame.bins().iter().copied().enumerate().collect();
            top.sort_by(|a, b| b.1.total_cmp(&a.1));
            println!("strongest bins:");
            for (bin, magnitude) in top.into_iter().take(5) {
                println!("  {:>8.1} Hz  {:.4}", bin as f32 * frame.bin_hz, magnitude);
            }
        }
        None => println!("no spectrum frame arrived"),
    }

    println!("dropped blocks: {}", node.dropped_blocks());
    println!("wrote monitor.wav");
    Ok(())
}
