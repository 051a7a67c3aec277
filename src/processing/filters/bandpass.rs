use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BandPassFilterConfig {
    pub f_low: f64,
    pub f_high: f64,
}

/// Cascaded second-order high-pass and low-pass sections conditioning the raw
/// channel before peak detection.
pub struct BandPassFilter {
    high_pass: SecondOrderFilter,
    low_pass: SecondOrderFilter,
}

enum FilterType {
    HighPass,
    LowPass,
}

struct SecondOrderFilter {
    a: [f64; 3],
    b: [f64; 3],
    x: [f64; 2],
    y: [f64; 2],
}

impl SecondOrderFilter {
    fn new(f0: f64, fs: f64, filter_type: FilterType) -> Self {
        let q = (2.0f64).sqrt() / 2.0; // Butterworth
        let omega = 2.0 * std::f64::consts::PI * f0 / fs;
        let alpha = f64::sin(omega) / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::HighPass => (
                (1.0 + f64::cos(omega)) / 2.0,
                -(1.0 + f64::cos(omega)),
                (1.0 + f64::cos(omega)) / 2.0,
                1.0 + alpha,
                -2.0 * f64::cos(omega),
                1.0 - alpha,
            ),
            FilterType::LowPass => (
                (1.0 - f64::cos(omega)) / 2.0,
                1.0 - f64::cos(omega),
                (1.0 - f64::cos(omega)) / 2.0,
                1.0 + alpha,
                -2.0 * f64::cos(omega),
                1.0 - alpha,
            ),
        };

        SecondOrderFilter {
            a: [a0, a1, a2],
            b: [b0, b1, b2],
            x: [0.0, 0.0],
            y: [0.0, 0.0],
        }
    }

    fn calculate_output(&mut self, input: f64) -> f64 {
        let output = (self.b[0] / self.a[0]) * input
            + (self.b[1] / self.a[0]) * self.x[0]
            + (self.b[2] / self.a[0]) * self.x[1]
            - (self.a[1] / self.a[0]) * self.y[0]
            - (self.a[2] / self.a[0]) * self.y[1];

        // Update internal sample history
        self.x[1] = self.x[0];
        self.x[0] = input;
        self.y[1] = self.y[0];
        self.y[0] = output;

        output
    }
}

impl BandPassFilter {
    pub fn new(config: &BandPassFilterConfig, fs: f64) -> Self {
        let high_pass = SecondOrderFilter::new(config.f_low, fs, FilterType::HighPass);
        let low_pass = SecondOrderFilter::new(config.f_high, fs, FilterType::LowPass);
        BandPassFilter {
            high_pass,
            low_pass,
        }
    }

    /// Filter an input sample and update the internal state.
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let high_pass_output = self.high_pass.calculate_output(input);
        self.low_pass.calculate_output(high_pass_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passband_tone_survives_stopband_tone_attenuates() {
        let fs = 512.0;
        let config = BandPassFilterConfig {
            f_low: 1.0,
            f_high: 15.0,
        };
        let mut filter_in = BandPassFilter::new(&config, fs);
        let mut filter_out = BandPassFilter::new(&config, fs);

        // 8 Hz tone sits inside the passband, 100 Hz well outside.
        let mut in_band_power = 0.0;
        let mut out_band_power = 0.0;
        let n = (4.0 * fs) as usize;
        for i in 0..n {
            let t = i as f64 / fs;
            let y_in = filter_in.process_sample((2.0 * std::f64::consts::PI * 8.0 * t).sin());
            let y_out = filter_out.process_sample((2.0 * std::f64::consts::PI * 100.0 * t).sin());
            // Skip the settling transient of the first second.
            if i > fs as usize {
                in_band_power += y_in * y_in;
                out_band_power += y_out * y_out;
            }
        }
        assert!(in_band_power > 10.0 * out_band_power);
    }
}
