use crate::engine::error::ModuleError;
use crate::engine::message::{ControlOp, ModuleImage};
use crate::engine::module::{AnalysisKernel, ComputeModule};
use crate::spectral::spectrum::{FftSize, SpectrumAnalyzer, SpectrumFrame};

/// The shipped compute module: compiles a module image into a windowed-FFT
/// spectrum aggregation kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpectralModule;

impl ComputeModule for SpectralModule {
    fn instantiate(&self, image: &ModuleImage) -> Result<Box<dyn AnalysisKernel>, ModuleError> {
        if image.version != ModuleImage::CURRENT_VERSION {
            return Err(ModuleError::UnsupportedVersion(image.version));
        }
        let fft_size = FftSize::from_usize(image.fft_size as usize)
            .ok_or(ModuleError::UnsupportedFftSize(image.fft_size))?;
        if !image.sample_rate.is_finite() || image.sample_rate <= 0.0 {
            return Err(ModuleError::InvalidParameter("sample_rate"));
        }
        if !image.averaging.is_finite() || !(0.0..1.0).contains(&image.averaging) {
            return Err(ModuleError::InvalidParameter("averaging"));
        }

        Ok(Box::new(SpectrumAnalyzer::new(
            image.sample_rate,
            fft_size,
            image.averaging,
        )))
    }
}

impl AnalysisKernel for SpectrumAnalyzer {
    fn ingest(&mut self, samples: &[f32]) {
        SpectrumAnalyzer::ingest(self, samples);
    }

    fn poll_frame(&mut self) -> Option<SpectrumFrame> {
        SpectrumAnalyzer::poll_frame(self)
    }

    fn control(&mut self, op: &ControlOp) {
        if let ControlOp::SetAveraging(averaging) = op {
            self.set_averaging(*averaging);
        }
    }

    fn reset(&mut self) {
        SpectrumAnalyzer::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ModuleImage {
        ModuleImage {
            version: ModuleImage::CURRENT_VERSION,
            sample_rate: 48000.0,
            fft_size: 1024,
            averaging: 0.8,
        }
    }

    #[test]
    fn test_instantiate_valid_image() {
        assert!(SpectralModule.instantiate(&image()).is_ok());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let bad = ModuleImage {
            version: 99,
            ..image()
        };
        assert_eq!(
            SpectralModule.instantiate(&bad).err(),
            Some(ModuleError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn test_rejects_non_power_of_two_fft() {
        let bad = ModuleImage {
            fft_size: 1000,
            ..image()
        };
        assert_eq!(
            SpectralModule.instantiate(&bad).err(),
            Some(ModuleError::UnsupportedFftSize(1000))
        );
    }

    #[test]
    fn test_rejects_out_of_range_averaging() {
        let bad = ModuleImage {
            averaging: 1.5,
            ..image()
        };
        assert_eq!(
            SpectralModule.instantiate(&bad).err(),
            Some(ModuleError::InvalidParameter("averaging"))
        );
    }
}
