use std::sync::atomic::{AtomicU32, Ordering};

/// A lock-free floating point parameter.
///
/// Stores the value as raw bits in an `AtomicU32` so the worker thread can
/// retune a running instance while the realtime thread reads without locking.
pub struct Parameter {
    value: AtomicU32,
}

impl Parameter {
    /// Creates a new Parameter with an initial value.
    pub const fn new(value: f32) -> Self {
        Parameter {
            value: AtomicU32::new(value.to_bits()),
        }
    }

    /// Sets the parameter value.
    pub fn set(&self, value: f32) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Gets the current parameter value.
    pub fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let p = Parameter::new(0.5);
        assert_eq!(p.get(), 0.5);
        p.set(-3.25);
        assert_eq!(p.get(), -3.25);
    }
}
