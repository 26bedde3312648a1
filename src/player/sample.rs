use log::warn;

use super::{SoundEngine, audio::AudioOutput};

/// Loops a single decoded clip for as long as typing lasts.
pub struct LoopEngine<A: AudioOutput> {
    output: A,
    clip: A::Clip,
    gain: f32,
    voice: Option<A::Voice>,
}

impl<A: AudioOutput> LoopEngine<A> {
    pub fn new(output: A, clip: A::Clip, gain: f32) -> LoopEngine<A> {
        LoopEngine {
            output,
            clip,
            gain,
            voice: None,
        }
    }

    pub fn is_looping(&self) -> bool {
        self.voice.is_some()
    }
}

impl<A: AudioOutput> SoundEngine for LoopEngine<A> {
    fn is_ready(&self) -> bool {
        true
    }

    fn sound(&mut self) -> Option<u32> {
        if self.voice.is_none() {
            match self.output.start_loop(&self.clip, self.gain) {
                Ok(voice) => self.voice = Some(voice),
                Err(e) => warn!("Could not start typing loop: {}", e),
            }
        }
        None
    }

    fn halt(&mut self) {
        if let Some(voice) = self.voice.take() {
            self.output.stop_voice(voice);
        }
    }

    fn wake(&mut self) {
        self.output.resume();
    }
}
