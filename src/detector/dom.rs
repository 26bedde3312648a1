use std::{cell::RefCell, rc::Rc};

use fxhash::FxHashSet;
use js_sys::Array;
use log::{debug, warn};
use wasm_bindgen::{JsCast, JsValue, prelude::Closure};
use web_sys::{
    Document, Element, HtmlElement, MutationObserver, MutationObserverInit, MutationRecord, Node,
};

use super::{ActivityDetector, PageView};
use crate::player::{TypingError, TypingErrorCode};

/// [`PageView`] over the live document.
pub struct DocumentView {
    document: Document,
    warned_selectors: RefCell<FxHashSet<String>>,
}

impl DocumentView {
    pub fn new(document: Document) -> DocumentView {
        DocumentView {
            document,
            warned_selectors: RefCell::new(FxHashSet::default()),
        }
    }

    fn warn_invalid_selector(&self, selector: &str) {
        if self.warned_selectors.borrow_mut().insert(selector.to_string()) {
            warn!("Ignoring invalid selector '{}'", selector);
        }
    }
}

impl PageView for DocumentView {
    type Element = Element;

    fn query_selector(&self, selector: &str) -> Option<Element> {
        match self.document.query_selector(selector) {
            Ok(element) => element,
            Err(_) => {
                self.warn_invalid_selector(selector);
                None
            }
        }
    }

    fn query_selector_all(&self, selector: &str) -> Vec<Element> {
        let nodes = match self.document.query_selector_all(selector) {
            Ok(nodes) => nodes,
            Err(_) => {
                self.warn_invalid_selector(selector);
                return vec![];
            }
        };
        (0..nodes.length())
            .filter_map(|i| nodes.item(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }

    fn is_rendered(&self, element: &Element) -> bool {
        match element.dyn_ref::<HtmlElement>() {
            Some(element) => element.offset_parent().is_some(),
            // SVG and other non-HTML elements have no offsetParent at all.
            None => true,
        }
    }

    /// Reads the `disabled` property, so only form controls can be disabled.
    fn is_disabled(&self, element: &Element) -> bool {
        js_sys::Reflect::get(element, &JsValue::from_str("disabled"))
            .is_ok_and(|disabled| disabled.is_truthy())
    }

    fn content_snapshot(&self, element: &Element) -> String {
        match element.text_content() {
            Some(text) if !text.is_empty() => text,
            _ => element.inner_html(),
        }
    }

    fn is_connected(&self, element: &Element) -> bool {
        element.is_connected()
    }

    fn parent_element(&self, element: &Element) -> Option<Element> {
        element.parent_element()
    }

    fn matches(&self, element: &Element, selector: &str) -> bool {
        match element.matches(selector) {
            Ok(matches) => matches,
            Err(_) => {
                self.warn_invalid_selector(selector);
                false
            }
        }
    }
}

/// Nearest element at or above a mutated node.
fn target_element(node: &Node) -> Option<Element> {
    match node.dyn_ref::<Element>() {
        Some(element) => Some(element.clone()),
        None => node.parent_element(),
    }
}

fn batch_is_relevant(detector: &ActivityDetector<DocumentView>, records: &Array) -> bool {
    let filter = detector.config().filter_mutations;
    records
        .iter()
        .filter_map(|record| record.dyn_into::<MutationRecord>().ok())
        .filter(|record| record.type_() == "childList")
        .any(|record| {
            if !filter {
                return true;
            }
            let target: Option<Node> = record.target().into();
            target
                .and_then(|node| target_element(&node))
                .is_some_and(|element| detector.is_relevant_target(&element))
        })
}

/// Keeps a subtree-wide child-list observer alive and runs one detection
/// pass per relevant mutation batch.
pub struct PageObserver {
    observer: MutationObserver,
    _callback: Closure<dyn FnMut(Array, MutationObserver)>,
}

impl PageObserver {
    pub fn attach(
        detector: &Rc<RefCell<ActivityDetector<DocumentView>>>,
    ) -> Result<PageObserver, TypingError> {
        let observer_error = |e: JsValue| {
            TypingError::from_js(TypingErrorCode::PageObserver, "MutationObserver", &e)
        };

        let weak_detector = Rc::downgrade(detector);
        let callback = Closure::<dyn FnMut(Array, MutationObserver)>::new(
            move |records: Array, _observer: MutationObserver| {
                let Some(detector) = weak_detector.upgrade() else {
                    return;
                };
                let Ok(mut detector) = detector.try_borrow_mut() else {
                    debug!("Detector busy, skipping mutation batch");
                    return;
                };
                if batch_is_relevant(&detector, &records) {
                    detector.check_for_typing_activity();
                }
            },
        );

        let observer =
            MutationObserver::new(callback.as_ref().unchecked_ref()).map_err(observer_error)?;

        let root: Node = {
            let detector = detector.borrow();
            let document = &detector.page().document;
            match document.body() {
                Some(body) => body.into(),
                None => document
                    .document_element()
                    .ok_or_else(|| {
                        TypingError::new_code(
                            TypingErrorCode::PageObserver,
                            "Document has no root element".to_string(),
                        )
                    })?
                    .into(),
            }
        };

        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        observer
            .observe_with_options(&root, &init)
            .map_err(observer_error)?;

        Ok(PageObserver {
            observer,
            _callback: callback,
        })
    }
}

impl Drop for PageObserver {
    fn drop(&mut self) {
        // The callback closure is freed right after this; JS must not call it again.
        self.observer.disconnect();
    }
}
