pub mod dom;

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use log::{debug, info};

use crate::{
    config::DetectorConfig,
    player::{
        TypingSound,
        timeout::{RepeatingTask, Scheduler, TimeoutSlot},
    },
};

/// Read-only view of the host page.
pub trait PageView {
    type Element: Clone + PartialEq;

    /// First match in document order. Invalid selectors match nothing.
    fn query_selector(&self, selector: &str) -> Option<Self::Element>;
    fn query_selector_all(&self, selector: &str) -> Vec<Self::Element>;

    /// Whether the element has a layout box.
    fn is_rendered(&self, element: &Self::Element) -> bool;
    fn is_disabled(&self, element: &Self::Element) -> bool;

    /// Text content, or the markup when the element has no text.
    fn content_snapshot(&self, element: &Self::Element) -> String;

    fn is_connected(&self, element: &Self::Element) -> bool;
    fn parent_element(&self, element: &Self::Element) -> Option<Self::Element>;
    fn matches(&self, element: &Self::Element, selector: &str) -> bool;
}

const SNAPSHOT_CAPACITY: usize = 32;

/// Last seen content per observed element, kept off the page's own objects.
pub struct ContentSnapshots<E> {
    entries: VecDeque<(E, String)>,
}

impl<E: Clone + PartialEq> ContentSnapshots<E> {
    pub fn new() -> ContentSnapshots<E> {
        ContentSnapshots {
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `content` for `element`. True only when a previous snapshot
    /// exists and differs.
    pub fn observe(&mut self, element: &E, content: String) -> bool {
        if let Some((_, last)) = self.entries.iter_mut().find(|(e, _)| e == element) {
            if *last == content {
                return false;
            }
            *last = content;
            return true;
        }

        if self.entries.len() >= SNAPSHOT_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((element.clone(), content));
        false
    }

    pub fn prune(&mut self, is_attached: impl Fn(&E) -> bool) {
        self.entries.retain(|(element, _)| is_attached(element));
    }
}

impl<E: Clone + PartialEq> Default for ContentSnapshots<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides whether the page is streaming assistant output and drives the player.
pub struct ActivityDetector<P: PageView> {
    page: P,
    player: Rc<dyn TypingSound>,
    scheduler: Rc<dyn Scheduler>,
    config: DetectorConfig,
    last_signal_ms: f64,
    snapshots: ContentSnapshots<P::Element>,
}

impl<P: PageView> ActivityDetector<P> {
    pub fn new(
        page: P,
        player: Rc<dyn TypingSound>,
        scheduler: Rc<dyn Scheduler>,
        config: DetectorConfig,
    ) -> ActivityDetector<P> {
        ActivityDetector {
            page,
            player,
            scheduler,
            config,
            last_signal_ms: 0.0,
            snapshots: ContentSnapshots::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn last_signal_ms(&self) -> f64 {
        self.last_signal_ms
    }

    pub fn tracked_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    pub fn check_for_typing_activity(&mut self) {
        let now = self.scheduler.now_ms();

        // Every check runs; the content check must refresh its snapshot even
        // when another signal already fired.
        let stop_button = self.stop_button_active();
        let content_changed = self.last_message_changed();
        let streaming = self.streaming_indicator_visible();
        let signal = stop_button || content_changed || streaming;

        if signal {
            self.last_signal_ms = now;
        }

        let playing = self.player.is_playing();
        if signal && !playing {
            self.player.start_typing();
            self.player.refresh_safety_net();
        } else if playing && now - self.last_signal_ms > self.config.stop_threshold_ms as f64 {
            info!(
                "⏰ No content update for {} ms, stopping",
                self.config.stop_threshold_ms
            );
            self.player.stop_typing();
        } else if signal && playing {
            self.player.refresh_safety_net();
        }
    }

    fn stop_button_active(&self) -> bool {
        for selector in &self.config.stop_button_selectors {
            let Some(button) = self.page.query_selector(selector) else {
                continue;
            };
            if self.page.is_rendered(&button) && !self.page.is_disabled(&button) {
                debug!("🔍 Stop button visible: {}", selector);
                return true;
            }
        }
        false
    }

    fn last_message_changed(&mut self) -> bool {
        let page = &self.page;
        self.snapshots.prune(|element| page.is_connected(element));

        let Some(message) = self
            .page
            .query_selector(&self.config.assistant_message_selector)
        else {
            return false;
        };
        let content = self.page.content_snapshot(&message);
        let changed = self.snapshots.observe(&message, content);
        if changed {
            debug!("🔍 Assistant message content changed");
        }
        changed
    }

    fn streaming_indicator_visible(&self) -> bool {
        let mut visible = false;
        for selector in &self.config.streaming_indicator_selectors {
            if self
                .page
                .query_selector_all(selector)
                .iter()
                .any(|element| self.page.is_rendered(element))
            {
                debug!("🔍 Streaming indicator visible: {}", selector);
                visible = true;
            }
        }
        visible
    }

    /// Whether a mutation at `element` happened inside an assistant message,
    /// looking at the element itself and up to `max_ancestor_depth` ancestors.
    pub fn is_relevant_target(&self, element: &P::Element) -> bool {
        let selector = &self.config.assistant_container_selector;
        let mut current = Some(element.clone());
        for _ in 0..=self.config.max_ancestor_depth {
            let Some(node) = current else {
                return false;
            };
            if self.page.matches(&node, selector) {
                return true;
            }
            current = self.page.parent_element(&node);
        }
        false
    }
}

/// The timer-driven triggers of a detector: the one-shot check after the page
/// settles and the fixed polling tick.
pub struct CheckSchedule {
    initial: TimeoutSlot,
    poll: Option<RepeatingTask>,
    scheduler: Rc<dyn Scheduler>,
}

impl CheckSchedule {
    pub fn start<P: PageView + 'static>(
        detector: &Rc<RefCell<ActivityDetector<P>>>,
        scheduler: &Rc<dyn Scheduler>,
    ) -> CheckSchedule {
        let (initial_delay_ms, poll_interval_ms) = {
            let detector = detector.borrow();
            (
                detector.config.initial_check_delay_ms,
                detector.config.poll_interval_ms,
            )
        };

        let initial = TimeoutSlot::new("initial activity check");
        let weak_detector = Rc::downgrade(detector);
        initial.schedule(&**scheduler, initial_delay_ms, move || {
            run_check(&weak_detector);
        });

        let poll = (poll_interval_ms > 0).then(|| {
            let weak_detector = Rc::downgrade(detector);
            RepeatingTask::start(scheduler, poll_interval_ms, move || {
                run_check(&weak_detector).then_some(poll_interval_ms)
            })
        });

        CheckSchedule {
            initial,
            poll,
            scheduler: Rc::clone(scheduler),
        }
    }

    pub fn cancel(&self) {
        self.initial.cancel(&*self.scheduler);
        if let Some(poll) = &self.poll {
            poll.cancel(&*self.scheduler);
        }
    }
}

/// Returns false once the detector is gone.
fn run_check<P: PageView>(detector: &std::rc::Weak<RefCell<ActivityDetector<P>>>) -> bool {
    let Some(detector) = detector.upgrade() else {
        return false;
    };
    match detector.try_borrow_mut() {
        Ok(mut detector) => detector.check_for_typing_activity(),
        Err(_) => debug!("Detector busy, skipping check"),
    }
    true
}
