//! Hardware-like delays for the mock devices.

use std::time::Duration;

/// Delays applied by the mocks. All zero by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Extra time after the exposure before an image is counted
    pub frame_readout: Duration,
    /// Time a summation plugin needs to fold in one frame
    pub plugin_drain: Duration,
}

impl TimingConfig {
    /// CCD-like readout.
    pub fn ccd() -> Self {
        Self {
            frame_readout: Duration::from_millis(100),
            plugin_drain: Duration::ZERO,
        }
    }

    /// Plugin chain that lags the detector.
    pub fn slow_plugin(drain: Duration) -> Self {
        Self {
            frame_readout: Duration::ZERO,
            plugin_drain: drain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert_eq!(TimingConfig::default().frame_readout, Duration::ZERO);
        assert_eq!(TimingConfig::ccd().frame_readout, Duration::from_millis(100));
        assert_eq!(
            TimingConfig::slow_plugin(Duration::from_millis(200)).plugin_drain,
            Duration::from_millis(200)
        );
    }
}
