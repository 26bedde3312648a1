use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use fxhash::FxHashMap;
use log::warn;
use url::Url;
use wasm_bindgen::prelude::*;
use web_sys::Window;

use crate::player::{
    TypingError, TypingErrorCode,
    timeout::{Scheduler, TimerCallback, TimerId},
};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = ["chrome", "runtime"], js_name = getURL)]
    fn chrome_runtime_get_url(path: &str) -> Result<String, JsValue>;
}

/// Resolves a bundled resource path. Uses the extension runtime when present,
/// otherwise resolves against the page URL.
pub fn resolve_asset_url(window: &Window, path: &str) -> Result<String, TypingError> {
    if let Ok(url) = Url::parse(path) {
        return Ok(url.into());
    }
    if let Ok(url) = chrome_runtime_get_url(path) {
        return Ok(url);
    }

    let href = window.location().href().map_err(|e| {
        TypingError::from_js(TypingErrorCode::AssetFetch, "Failed to read page URL", &e)
    })?;
    Url::parse(&href)
        .and_then(|base| base.join(path))
        .map(String::from)
        .map_err(|e| {
            TypingError::new_code(
                TypingErrorCode::AssetFetch,
                format!("Cannot resolve '{path}' against '{href}': {e}"),
            )
        })
}

type TimerClosure = Closure<dyn FnMut()>;

/// [`Scheduler`] on top of `window.setTimeout`.
///
/// Each pending callback is owned here until it fires or is cleared. A closure
/// cannot be freed while it runs, so finished ones wait in `spent` and are
/// dropped when the next timer fires.
pub struct WindowScheduler {
    window: Window,
    live: Rc<RefCell<FxHashMap<i32, TimerClosure>>>,
    spent: Rc<RefCell<Vec<TimerClosure>>>,
}

impl WindowScheduler {
    pub fn new(window: Window) -> WindowScheduler {
        WindowScheduler {
            window,
            live: Rc::new(RefCell::new(FxHashMap::default())),
            spent: Rc::new(RefCell::new(vec![])),
        }
    }
}

impl Scheduler for WindowScheduler {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn set_timeout(&self, delay_ms: u32, callback: TimerCallback) -> Option<TimerId> {
        let handle = Rc::new(Cell::new(None::<i32>));
        let mut callback = Some(callback);

        let live = Rc::clone(&self.live);
        let spent = Rc::clone(&self.spent);
        let own_handle = Rc::clone(&handle);
        let closure = TimerClosure::new(move || {
            spent.borrow_mut().clear();
            if let Some(callback) = callback.take() {
                callback();
            }
            if let Some(handle) = own_handle.get() {
                if let Some(finished) = live.borrow_mut().remove(&handle) {
                    spent.borrow_mut().push(finished);
                }
            }
        });

        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                delay_ms as i32,
            ) {
            Ok(id) => {
                handle.set(Some(id));
                self.live.borrow_mut().insert(id, closure);
                Some(TimerId(id))
            }
            Err(e) => {
                warn!("setTimeout failed: {:?}", e);
                None
            }
        }
    }

    fn clear_timeout(&self, id: TimerId) {
        self.window.clear_timeout_with_handle(id.0);
        if let Some(cleared) = self.live.borrow_mut().remove(&id.0) {
            self.spent.borrow_mut().push(cleared);
        }
    }
}
