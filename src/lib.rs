pub mod config;
pub mod detector;
pub mod js_api;
pub mod player;
mod utils;

#[cfg(test)]
mod testing;

use std::{cell::RefCell, rc::Rc};

use log::{error, info, warn};
use rand::{SeedableRng, rngs::SmallRng};
use utils::{init_logging, set_panic_hook};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{Document, Window};

use config::TypingConfig;
use detector::{
    ActivityDetector, CheckSchedule,
    dom::{DocumentView, PageObserver},
};
use js_api::{WindowScheduler, resolve_asset_url};
use player::{
    PlayerTimings, TypingPlayer, TypingSound, audio::WebAudioOutput, engine::build_engine,
    timeout::Scheduler,
};

/// The detector and player pair of this page load.
struct TypingSounds {
    player: Rc<TypingPlayer>,
    _detector: Rc<RefCell<ActivityDetector<DocumentView>>>,
    _observer: Option<PageObserver>,
    _checks: CheckSchedule,
}

thread_local! {
    static TYPING_SOUNDS: RefCell<Option<TypingSounds>> = const { RefCell::new(None) };
}

fn current_player() -> Option<Rc<TypingPlayer>> {
    TYPING_SOUNDS.with(|app| app.borrow().as_ref().map(|app| Rc::clone(&app.player)))
}

#[wasm_bindgen]
pub fn is_typing() -> bool {
    current_player().is_some_and(|player| player.is_playing())
}

#[wasm_bindgen]
pub fn stop_typing() {
    if let Some(player) = current_player() {
        player.stop_typing();
    }
}

async fn boot(window: Window, document: Document, config: TypingConfig) {
    if TYPING_SOUNDS.with(|app| app.borrow().is_some()) {
        return;
    }
    info!("🎵 Typing sounds starting ({:?})", config.sound.variant);

    let scheduler: Rc<dyn Scheduler> = Rc::new(WindowScheduler::new(window.clone()));
    let engine = build_engine(
        WebAudioOutput::new(),
        &config.sound,
        |path| resolve_asset_url(&window, path),
        SmallRng::from_os_rng(),
    )
    .await;
    let player = Rc::new(TypingPlayer::new(
        Rc::clone(&scheduler),
        engine,
        PlayerTimings::from_config(&config),
    ));

    let detector = Rc::new(RefCell::new(ActivityDetector::new(
        DocumentView::new(document),
        player.clone(),
        Rc::clone(&scheduler),
        config.detector,
    )));
    let observer = match PageObserver::attach(&detector) {
        Ok(observer) => Some(observer),
        Err(e) => {
            warn!("Page mutations will not be observed: {}", e);
            None
        }
    };
    let checks = CheckSchedule::start(&detector, &scheduler);

    TYPING_SOUNDS.with(|app| {
        *app.borrow_mut() = Some(TypingSounds {
            player,
            _detector: detector,
            _observer: observer,
            _checks: checks,
        });
    });
}

/// `document.readyState` before `DOMContentLoaded` has fired.
fn is_loading(ready_state: &str) -> bool {
    ready_state == "loading"
}

fn run_when_ready(config: TypingConfig) {
    let Some(window) = web_sys::window() else {
        error!("No window, typing sounds disabled");
        return;
    };
    let Some(document) = window.document() else {
        error!("No document, typing sounds disabled");
        return;
    };

    if !is_loading(&document.ready_state()) {
        spawn_local(boot(window, document, config));
        return;
    }

    let target = document.clone();
    let on_ready = Closure::once_into_js(move || spawn_local(boot(window, document, config)));
    if let Err(e) =
        target.add_event_listener_with_callback("DOMContentLoaded", on_ready.unchecked_ref())
    {
        error!("Failed to wait for DOMContentLoaded: {:?}", e);
    }
}

#[wasm_bindgen(start)]
pub fn main() {
    set_panic_hook();

    let config = TypingConfig::bundled();
    init_logging(
        config
            .as_ref()
            .map(|config| config.log_level())
            .unwrap_or(log::Level::Info),
    );
    let config = config.unwrap_or_else(|e| {
        warn!("{}, using defaults", e);
        TypingConfig::default()
    });

    run_when_ready(config);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_waits_only_while_loading() {
        assert!(is_loading("loading"));
        assert!(!is_loading("interactive"));
        assert!(!is_loading("complete"));
    }
}
