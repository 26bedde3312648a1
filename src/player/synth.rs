use std::f32::consts::PI;

use log::{debug, info};
use rand::{Rng, rngs::SmallRng};

use super::{SoundEngine, TypingError, audio::AudioOutput};
use crate::config::SynthConfig;

const ENVELOPE_DECAY: f32 = 50.0;
const ENVELOPE_SQUARED_DECAY: f32 = 200.0;
const NOISE_AMPLITUDE: f32 = 0.4;
const FINAL_AMPLITUDE: f32 = 0.15;

/// (frequency in Hz, amplitude) of the sine partials that give the click its pitch.
const CLICK_PARTIALS: [(f32, f32); 3] = [(2000.0, 0.3), (3500.0, 0.2), (5000.0, 0.1)];

pub fn click_sample_count(sample_rate: f32, duration_ms: u32) -> usize {
    (sample_rate as f64 * duration_ms as f64 / 1000.0).round() as usize
}

/// Renders one mono key click: white noise plus three sine partials under a
/// fast linear-exponential times quadratic-exponential envelope.
pub fn render_key_click(sample_rate: f32, duration_ms: u32, rng: &mut impl Rng) -> Vec<f32> {
    let len = click_sample_count(sample_rate, duration_ms);
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate;
            let noise = (rng.random::<f32>() - 0.5) * NOISE_AMPLITUDE;
            let click: f32 = CLICK_PARTIALS
                .iter()
                .map(|(freq, amp)| (2.0 * PI * freq * t).sin() * amp)
                .sum();
            let envelope = (-t * ENVELOPE_DECAY).exp() * (-t * t * ENVELOPE_SQUARED_DECAY).exp();
            ((noise + click) * envelope * FINAL_AMPLITUDE).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Plays a randomly chosen click from a pre-rendered pool on an uneven,
/// human-like cadence.
pub struct KeyClickEngine<A: AudioOutput> {
    output: A,
    pool: Vec<A::Clip>,
    gain: f32,
    min_interval_ms: u32,
    interval_jitter_ms: u32,
    rng: SmallRng,
}

impl<A: AudioOutput> KeyClickEngine<A> {
    pub fn new(
        output: A,
        config: &SynthConfig,
        gain: f32,
        mut rng: SmallRng,
    ) -> Result<KeyClickEngine<A>, TypingError> {
        let sample_rate = output.sample_rate();
        let pool = (0..config.pool_size)
            .map(|_| {
                let samples = render_key_click(sample_rate, config.click_duration_ms, &mut rng);
                output.create_clip(&samples)
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("🔊 {} key click sounds ready", pool.len());

        Ok(KeyClickEngine {
            output,
            pool,
            gain,
            min_interval_ms: config.min_interval_ms,
            interval_jitter_ms: config.interval_jitter_ms,
            rng,
        })
    }

    fn next_interval(&mut self) -> u32 {
        if self.interval_jitter_ms == 0 {
            return self.min_interval_ms;
        }
        self.min_interval_ms + self.rng.random_range(0..self.interval_jitter_ms)
    }
}

impl<A: AudioOutput> SoundEngine for KeyClickEngine<A> {
    fn is_ready(&self) -> bool {
        !self.pool.is_empty()
    }

    fn sound(&mut self) -> Option<u32> {
        if self.pool.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..self.pool.len());
        if let Err(e) = self.output.play_clip(&self.pool[index], self.gain) {
            debug!("Key click dropped: {}", e);
        }
        Some(self.next_interval())
    }

    fn halt(&mut self) {
        // Clicks are short one-shots; the cadence stopping is enough.
    }

    fn wake(&mut self) {
        self.output.resume();
    }
}
