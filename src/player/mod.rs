pub mod audio;
pub mod engine;
pub mod sample;
pub mod synth;
pub mod timeout;

use std::{cell::RefCell, fmt, rc::Rc};

use log::{debug, info};
use wasm_bindgen::JsValue;

use crate::config::TypingConfig;
use timeout::{RepeatingTask, Scheduler, TimeoutSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingErrorCode {
    AudioUnavailable,
    AssetFetch,
    AssetDecode,
    Playback,
    PageObserver,
}

#[derive(Debug)]
pub struct TypingError {
    pub code: TypingErrorCode,
    pub message: String,
}

impl TypingError {
    pub fn new_code(code: TypingErrorCode, message: String) -> TypingError {
        TypingError { code, message }
    }

    pub fn from_js(code: TypingErrorCode, context: &str, value: &JsValue) -> TypingError {
        Self::new_code(code, format!("{context}: {value:?}"))
    }
}

impl fmt::Display for TypingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for TypingError {}

/// The playback surface the activity detector drives.
pub trait TypingSound {
    fn start_typing(&self);
    fn stop_typing(&self);
    fn is_playing(&self) -> bool;
    /// Pushes the inactivity safety net out by its full window. Ignored while idle.
    fn refresh_safety_net(&self);
}

/// How a player makes noise once the initial delay has passed.
pub trait SoundEngine {
    /// False when the audio pool or asset failed to initialize.
    fn is_ready(&self) -> bool;

    /// Makes sound. Returns the delay until the next call, or `None` when the
    /// sound sustains itself until [`SoundEngine::halt`].
    fn sound(&mut self) -> Option<u32>;

    fn halt(&mut self);

    /// Called on every start, before the initial delay.
    fn wake(&mut self) {}
}

/// Engine used when audio could not be initialized for this page load.
pub struct SilentEngine;

impl SoundEngine for SilentEngine {
    fn is_ready(&self) -> bool {
        false
    }

    fn sound(&mut self) -> Option<u32> {
        None
    }

    fn halt(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerTimings {
    pub initial_delay_ms: u32,
    pub safety_net_ms: u32,
}

impl PlayerTimings {
    pub fn from_config(config: &TypingConfig) -> PlayerTimings {
        PlayerTimings {
            initial_delay_ms: config.sound.initial_delay_ms,
            safety_net_ms: config.detector.safety_net_ms,
        }
    }
}

struct PlayerInner {
    state: PlaybackState,
    engine: Box<dyn SoundEngine>,
    cadence: Option<RepeatingTask>,
    safety_net: TimeoutSlot,
    timings: PlayerTimings,
}

/// Owns the playback state and every timer armed on its behalf.
pub struct TypingPlayer {
    inner: Rc<RefCell<PlayerInner>>,
    scheduler: Rc<dyn Scheduler>,
}

impl TypingPlayer {
    pub fn new(
        scheduler: Rc<dyn Scheduler>,
        engine: Box<dyn SoundEngine>,
        timings: PlayerTimings,
    ) -> TypingPlayer {
        TypingPlayer {
            inner: Rc::new(RefCell::new(PlayerInner {
                state: PlaybackState::Idle,
                engine,
                cadence: None,
                safety_net: TimeoutSlot::new("inactivity safety net"),
                timings,
            })),
            scheduler,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.borrow().state
    }

    pub fn live_timers(&self) -> usize {
        let inner = self.inner.borrow();
        let cadence = inner.cadence.as_ref().is_some_and(|task| task.is_live()) as usize;
        cadence + inner.safety_net.is_scheduled() as usize
    }
}

fn stop_player(inner: &RefCell<PlayerInner>, scheduler: &dyn Scheduler) {
    let mut inner = inner.borrow_mut();
    if let Some(cadence) = inner.cadence.take() {
        cadence.cancel(scheduler);
    }
    inner.safety_net.cancel(scheduler);

    if inner.state == PlaybackState::Idle {
        return;
    }
    inner.state = PlaybackState::Idle;
    inner.engine.halt();
    info!("🛑 Typing stopped");
}

impl TypingSound for TypingPlayer {
    fn start_typing(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == PlaybackState::Playing {
            return;
        }
        if !inner.engine.is_ready() {
            debug!("Typing sound is not available, staying silent");
            return;
        }

        inner.state = PlaybackState::Playing;
        inner.engine.wake();
        info!("⌨️ Typing started");

        let weak_inner = Rc::downgrade(&self.inner);
        let cadence = RepeatingTask::start(
            &self.scheduler,
            inner.timings.initial_delay_ms,
            move || {
                let inner = weak_inner.upgrade()?;
                let mut inner = inner.borrow_mut();
                if inner.state != PlaybackState::Playing {
                    return None;
                }
                inner.engine.sound()
            },
        );
        if let Some(previous) = inner.cadence.replace(cadence) {
            previous.cancel(&*self.scheduler);
        }
    }

    fn stop_typing(&self) {
        stop_player(&self.inner, &*self.scheduler);
    }

    fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    fn refresh_safety_net(&self) {
        let inner = self.inner.borrow();
        if inner.state != PlaybackState::Playing {
            return;
        }

        let weak_inner = Rc::downgrade(&self.inner);
        let scheduler = Rc::clone(&self.scheduler);
        inner
            .safety_net
            .schedule(&*self.scheduler, inner.timings.safety_net_ms, move || {
                let Some(inner) = weak_inner.upgrade() else {
                    return;
                };
                if inner.borrow().state == PlaybackState::Playing {
                    info!("⏰ No activity within the safety net window, stopping");
                    stop_player(&inner, &*scheduler);
                }
            });
    }
}
