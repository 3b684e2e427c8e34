use crate::core::quantum::AudioQuantum;

/// The core trait for realtime block processors.
///
/// `process` is invoked by the host's audio graph once per render quantum and
/// must complete within one block period. Implementations must not allocate,
/// take locks, or perform blocking I/O on this path; all fallible work
/// belongs on the worker side of the engine.
pub trait QuantumProcessor {
    /// Processes one audio quantum.
    ///
    /// # Arguments
    /// * `input` - The input block, or `None` when the upstream is
    ///   disconnected. An absent input must be tolerated; implementations
    ///   produce silence in that case.
    /// * `output` - The output block to fill.
    /// * `sample_index` - The global sample index of the start of the block.
    ///
    /// Returns `true` while the processor wishes to keep being invoked,
    /// `false` once it has been retired and the host may drop it.
    fn process(
        &mut self,
        input: Option<&AudioQuantum>,
        output: &mut AudioQuantum,
        sample_index: u64,
    ) -> bool;

    /// Sets the sample rate.
    ///
    /// Called before processing starts; never from the realtime path.
    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    /// Returns the latency of the processor in samples.
    fn latency_samples(&self) -> u32 {
        0
    }
}

impl<T: QuantumProcessor + ?Sized> QuantumProcessor for Box<T> {
    fn process(
        &mut self,
        input: Option<&AudioQuantum>,
        output: &mut AudioQuantum,
        sample_index: u64,
    ) -> bool {
        (**self).process(input, output, sample_index)
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        (**self).set_sample_rate(sample_rate);
    }

    fn latency_samples(&self) -> u32 {
        (**self).latency_samples()
    }
}
