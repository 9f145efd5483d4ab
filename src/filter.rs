// https://en.wikipedia.org/wiki/Butterworth_filter
// An even-order Butterworth low-pass realised as a cascade of second-order
// sections, each designed with the bilinear transform.

use std::f64::consts::PI;

#[derive(Clone, Copy, Debug)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    // transposed direct form II state
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn low_pass(cutoff_hz: f64, sample_rate: f64, q: f64) -> Biquad {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a0 = 1.0 + alpha;
        let b1 = (1.0 - cos_w0) / a0;
        Biquad {
            b0: b1 / 2.0,
            b1,
            b2: b1 / 2.0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Low-pass Butterworth filter of even order.
#[derive(Clone, Debug)]
pub struct ButterworthLowPass {
    sections: Vec<Biquad>,
}

impl ButterworthLowPass {
    /// `order` must be even; the cutoff is clamped just below Nyquist.
    pub fn new(order: usize, cutoff_hz: f64, sample_rate: u32) -> ButterworthLowPass {
        let sample_rate = sample_rate as f64;
        let cutoff_hz = cutoff_hz.min(sample_rate * 0.49);
        let pairs = (order / 2).max(1);
        let sections = (0..pairs)
            .map(|k| {
                // pole pair k of an order-n Butterworth prototype
                let theta = PI * (2 * k + 1) as f64 / (2 * pairs * 2) as f64;
                let q = 1.0 / (2.0 * theta.cos());
                Biquad::low_pass(cutoff_hz, sample_rate, q)
            })
            .collect();
        ButterworthLowPass { sections }
    }

    pub fn process_sample(&mut self, sample: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(sample, |acc, section| section.process(acc))
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    /// Filters one channel of 16-bit samples in place, saturating at the i16 range.
    pub fn process_i16(&mut self, samples: &mut [i16]) {
        for sample in samples.iter_mut() {
            let filtered = self.process_sample(*sample as f64).round();
            *sample = filtered.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }
}
