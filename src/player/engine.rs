use log::{error, info};
use rand::rngs::SmallRng;

use super::{
    SilentEngine, SoundEngine, TypingError, audio::AudioOutput, sample::LoopEngine,
    synth::KeyClickEngine,
};
use crate::config::{SoundConfig, SoundVariant};

async fn try_build_engine<A>(
    output: Result<A, TypingError>,
    sound: &SoundConfig,
    resolve_url: impl FnOnce(&str) -> Result<String, TypingError>,
    rng: SmallRng,
) -> Result<Box<dyn SoundEngine>, TypingError>
where
    A: AudioOutput + 'static,
    A::Clip: 'static,
    A::Voice: 'static,
{
    let output = output?;
    match sound.variant {
        SoundVariant::Synth => {
            let engine = KeyClickEngine::new(output, &sound.synth, sound.gain, rng)?;
            Ok(Box::new(engine))
        }
        SoundVariant::Sample => {
            let url = resolve_url(&sound.sample.asset_path)?;
            let clip = output.load_clip(&url).await?;
            info!("🔊 Typing sound loaded from {}", url);
            Ok(Box::new(LoopEngine::new(output, clip, sound.gain)))
        }
    }
}

/// Builds the configured engine. Never fails: when audio or the asset is
/// unavailable the error is logged once and the page stays silent.
pub async fn build_engine<A>(
    output: Result<A, TypingError>,
    sound: &SoundConfig,
    resolve_url: impl FnOnce(&str) -> Result<String, TypingError>,
    rng: SmallRng,
) -> Box<dyn SoundEngine>
where
    A: AudioOutput + 'static,
    A::Clip: 'static,
    A::Voice: 'static,
{
    match try_build_engine(output, sound, resolve_url, rng).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("❌ Typing sounds disabled for this page: {}", e);
            Box::new(SilentEngine)
        }
    }
}
