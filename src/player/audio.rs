use log::debug;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{AudioBuffer, AudioBufferSourceNode, AudioContext, GainNode, Response};

use super::{TypingError, TypingErrorCode};

/// The realtime audio graph a sound engine plays into.
pub trait AudioOutput {
    type Clip: Clone;
    type Voice;

    fn sample_rate(&self) -> f32;

    /// Wraps mono samples at [`AudioOutput::sample_rate`] into a playable clip.
    fn create_clip(&self, samples: &[f32]) -> Result<Self::Clip, TypingError>;

    /// Fire and forget.
    fn play_clip(&self, clip: &Self::Clip, gain: f32) -> Result<(), TypingError>;

    fn start_loop(&self, clip: &Self::Clip, gain: f32) -> Result<Self::Voice, TypingError>;

    /// Fetches and decodes an audio asset. Failures are returned, never logged.
    fn load_clip(&self, url: &str) -> impl Future<Output = Result<Self::Clip, TypingError>>;

    /// Stopping a voice that already stopped is not an error.
    fn stop_voice(&self, voice: Self::Voice);

    /// Best effort resume of a context suspended by the autoplay policy.
    fn resume(&self) {}
}

pub struct LoopVoice {
    source: AudioBufferSourceNode,
    gain: GainNode,
}

/// Web Audio backed output: one `AudioContext`, a source and gain node per voice.
pub struct WebAudioOutput {
    context: AudioContext,
}

fn playback_error(context: &str) -> impl FnOnce(JsValue) -> TypingError + '_ {
    move |e| TypingError::from_js(TypingErrorCode::Playback, context, &e)
}

impl WebAudioOutput {
    pub fn new() -> Result<WebAudioOutput, TypingError> {
        let context = AudioContext::new().map_err(|e| {
            TypingError::from_js(
                TypingErrorCode::AudioUnavailable,
                "Failed to create AudioContext",
                &e,
            )
        })?;
        debug!("🎵 AudioContext created at {} Hz", context.sample_rate());
        Ok(WebAudioOutput { context })
    }

    fn connect_voice(
        &self,
        clip: &AudioBuffer,
        gain: f32,
        looping: bool,
    ) -> Result<LoopVoice, TypingError> {
        let source = self
            .context
            .create_buffer_source()
            .map_err(playback_error("Failed to create source node"))?;
        source.set_buffer(Some(clip));
        source.set_loop(looping);

        let gain_node = self
            .context
            .create_gain()
            .map_err(playback_error("Failed to create gain node"))?;
        gain_node.gain().set_value(gain);

        source
            .connect_with_audio_node(&gain_node)
            .map_err(playback_error("Failed to connect source to gain"))?;
        gain_node
            .connect_with_audio_node(&self.context.destination())
            .map_err(playback_error("Failed to connect gain to destination"))?;
        source
            .start()
            .map_err(playback_error("Failed to start source node"))?;

        Ok(LoopVoice {
            source,
            gain: gain_node,
        })
    }
}

impl AudioOutput for WebAudioOutput {
    type Clip = AudioBuffer;
    type Voice = LoopVoice;

    fn sample_rate(&self) -> f32 {
        self.context.sample_rate()
    }

    fn create_clip(&self, samples: &[f32]) -> Result<AudioBuffer, TypingError> {
        let buffer = self
            .context
            .create_buffer(1, samples.len() as u32, self.sample_rate())
            .map_err(|e| {
                TypingError::from_js(
                    TypingErrorCode::AudioUnavailable,
                    "Failed to create AudioBuffer",
                    &e,
                )
            })?;
        buffer.copy_to_channel(samples, 0).map_err(|e| {
            TypingError::from_js(
                TypingErrorCode::AudioUnavailable,
                "Failed to fill AudioBuffer",
                &e,
            )
        })?;
        Ok(buffer)
    }

    fn play_clip(&self, clip: &AudioBuffer, gain: f32) -> Result<(), TypingError> {
        // One-shot nodes are collected by the browser once playback ends.
        self.connect_voice(clip, gain, false).map(|_| ())
    }

    fn start_loop(&self, clip: &AudioBuffer, gain: f32) -> Result<LoopVoice, TypingError> {
        self.connect_voice(clip, gain, true)
    }

    async fn load_clip(&self, url: &str) -> Result<AudioBuffer, TypingError> {
        let window = web_sys::window().ok_or_else(|| {
            TypingError::new_code(TypingErrorCode::AssetFetch, "No window".to_string())
        })?;
        let fetch_error =
            |e: JsValue| TypingError::from_js(TypingErrorCode::AssetFetch, url, &e);

        let response = JsFuture::from(window.fetch_with_str(url))
            .await
            .map_err(fetch_error)?
            .dyn_into::<Response>()
            .map_err(fetch_error)?;
        if !response.ok() {
            return Err(TypingError::new_code(
                TypingErrorCode::AssetFetch,
                format!("{url}: HTTP {}", response.status()),
            ));
        }
        let bytes = JsFuture::from(response.array_buffer().map_err(fetch_error)?)
            .await
            .map_err(fetch_error)?
            .dyn_into::<js_sys::ArrayBuffer>()
            .map_err(fetch_error)?;

        let decode_error =
            |e: JsValue| TypingError::from_js(TypingErrorCode::AssetDecode, url, &e);
        let decode_promise = self
            .context
            .decode_audio_data(&bytes)
            .map_err(decode_error)?;
        JsFuture::from(decode_promise)
            .await
            .map_err(decode_error)?
            .dyn_into::<AudioBuffer>()
            .map_err(decode_error)
    }

    fn stop_voice(&self, voice: LoopVoice) {
        if let Err(e) = voice.source.stop() {
            debug!("Ignoring stop on a stopped voice: {:?}", e);
        }
        let _ = voice.source.disconnect();
        let _ = voice.gain.disconnect();
    }

    fn resume(&self) {
        if self.context.state() == web_sys::AudioContextState::Suspended {
            let _ = self.context.resume();
        }
    }
}
