//! Deterministic stand-ins for the browser, shared by the unit tests.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::{
    detector::PageView,
    player::{
        TypingError, TypingErrorCode, TypingSound,
        audio::AudioOutput,
        timeout::{Scheduler, TimerCallback, TimerId},
    },
};

struct PendingTimer {
    due: f64,
    id: i32,
    callback: TimerCallback,
}

/// Virtual-time event loop. Timers only fire inside [`ManualScheduler::advance`].
pub struct ManualScheduler {
    now: Cell<f64>,
    next_id: Cell<i32>,
    pending: RefCell<Vec<PendingTimer>>,
}

impl ManualScheduler {
    pub fn new() -> Rc<ManualScheduler> {
        Rc::new(ManualScheduler {
            now: Cell::new(0.0),
            next_id: Cell::new(1),
            pending: RefCell::new(vec![]),
        })
    }

    pub fn live_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Moves the clock forward, firing due timers in deadline order. Timers
    /// scheduled by a firing callback fire too if they fall inside the window.
    pub fn advance(&self, ms: f64) {
        let target = self.now.get() + ms;
        loop {
            let next = {
                let mut pending = self.pending.borrow_mut();
                let position = pending
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)))
                    .map(|(position, _)| position);
                position.map(|position| pending.remove(position))
            };
            let Some(timer) = next else {
                break;
            };
            self.now.set(timer.due);
            (timer.callback)();
        }
        self.now.set(target);
    }
}

impl Scheduler for ManualScheduler {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }

    fn set_timeout(&self, delay_ms: u32, callback: TimerCallback) -> Option<TimerId> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.pending.borrow_mut().push(PendingTimer {
            due: self.now.get() + delay_ms as f64,
            id,
            callback,
        });
        Some(TimerId(id))
    }

    fn clear_timeout(&self, id: TimerId) {
        self.pending.borrow_mut().retain(|timer| timer.id != id.0);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    Play { clip: usize, gain: f32, at: f64 },
    LoopStart { voice: u32, gain: f32, at: f64 },
    LoopStop { voice: u32, at: f64 },
    Resume,
}

#[derive(Default)]
struct RecordingLog {
    clips: Vec<Vec<f32>>,
    events: Vec<AudioEvent>,
    next_voice: u32,
    fail_playback: bool,
    fail_loading: bool,
    loaded_urls: Vec<String>,
}

/// Audio output that records what would have been played. Clones share a log.
#[derive(Clone)]
pub struct RecordingOutput {
    clock: Rc<ManualScheduler>,
    log: Rc<RefCell<RecordingLog>>,
}

impl RecordingOutput {
    pub fn new(clock: &Rc<ManualScheduler>) -> RecordingOutput {
        RecordingOutput {
            clock: Rc::clone(clock),
            log: Rc::new(RefCell::new(RecordingLog::default())),
        }
    }

    pub fn create_test_clip(&self, len: usize) -> usize {
        self.create_clip(&vec![0.0; len]).unwrap()
    }

    pub fn clips(&self) -> Vec<Vec<f32>> {
        self.log.borrow().clips.clone()
    }

    pub fn events(&self) -> Vec<AudioEvent> {
        self.log.borrow().events.clone()
    }

    pub fn play_times(&self) -> Vec<f64> {
        self.log
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                AudioEvent::Play { at, .. } => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub fn fail_playback(&self, fail: bool) {
        self.log.borrow_mut().fail_playback = fail;
    }

    pub fn fail_loading(&self, fail: bool) {
        self.log.borrow_mut().fail_loading = fail;
    }

    pub fn loaded_urls(&self) -> Vec<String> {
        self.log.borrow().loaded_urls.clone()
    }

    fn check_playback(&self) -> Result<(), TypingError> {
        if self.log.borrow().fail_playback {
            return Err(TypingError::new_code(
                TypingErrorCode::Playback,
                "playback disabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl AudioOutput for RecordingOutput {
    type Clip = usize;
    type Voice = u32;

    fn sample_rate(&self) -> f32 {
        44100.0
    }

    fn create_clip(&self, samples: &[f32]) -> Result<usize, TypingError> {
        let mut log = self.log.borrow_mut();
        log.clips.push(samples.to_vec());
        Ok(log.clips.len() - 1)
    }

    fn play_clip(&self, clip: &usize, gain: f32) -> Result<(), TypingError> {
        self.check_playback()?;
        let at = self.clock.now_ms();
        self.log.borrow_mut().events.push(AudioEvent::Play {
            clip: *clip,
            gain,
            at,
        });
        Ok(())
    }

    fn start_loop(&self, _clip: &usize, gain: f32) -> Result<u32, TypingError> {
        self.check_playback()?;
        let at = self.clock.now_ms();
        let mut log = self.log.borrow_mut();
        let voice = log.next_voice;
        log.next_voice += 1;
        log.events.push(AudioEvent::LoopStart { voice, gain, at });
        Ok(voice)
    }

    async fn load_clip(&self, url: &str) -> Result<usize, TypingError> {
        let fail = {
            let mut log = self.log.borrow_mut();
            log.loaded_urls.push(url.to_string());
            log.fail_loading
        };
        if fail {
            return Err(TypingError::new_code(
                TypingErrorCode::AssetFetch,
                format!("{url}: HTTP 404"),
            ));
        }
        self.create_clip(&[0.0; 64])
    }

    fn stop_voice(&self, voice: u32) {
        let at = self.clock.now_ms();
        self.log
            .borrow_mut()
            .events
            .push(AudioEvent::LoopStop { voice, at });
    }

    fn resume(&self) {
        self.log.borrow_mut().events.push(AudioEvent::Resume);
    }
}

thread_local! {
    static CAPTURED_LOGS: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(vec![]) };
}

/// `log` backend keeping records per thread, so parallel tests do not mix.
struct CapturingLogger;

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let entry = (record.level(), record.args().to_string());
        let _ = CAPTURED_LOGS.try_with(|logs| logs.borrow_mut().push(entry));
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger;

/// Installs the capturing logger and clears this thread's records.
pub fn capture_logs() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
    CAPTURED_LOGS.with(|logs| logs.borrow_mut().clear());
}

pub fn captured_logs(level: log::Level) -> Vec<String> {
    CAPTURED_LOGS.with(|logs| {
        logs.borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    })
}

struct FakeNode {
    selectors: Vec<String>,
    rendered: bool,
    disabled: bool,
    content: String,
    parent: Option<usize>,
    connected: bool,
}

/// A page made of nodes that "match" exactly the selectors they were created with.
#[derive(Clone, Default)]
pub struct FakePage {
    nodes: Rc<RefCell<Vec<FakeNode>>>,
}

impl FakePage {
    pub fn new() -> FakePage {
        FakePage::default()
    }

    pub fn add(&self, selectors: &[&str]) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(FakeNode {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            rendered: true,
            disabled: false,
            content: String::new(),
            parent: None,
            connected: true,
        });
        nodes.len() - 1
    }

    pub fn add_child(&self, parent: usize, selectors: &[&str]) -> usize {
        let id = self.add(selectors);
        self.nodes.borrow_mut()[id].parent = Some(parent);
        id
    }

    pub fn set_content(&self, id: usize, content: &str) {
        self.nodes.borrow_mut()[id].content = content.to_string();
    }

    pub fn set_rendered(&self, id: usize, rendered: bool) {
        self.nodes.borrow_mut()[id].rendered = rendered;
    }

    pub fn set_disabled(&self, id: usize, disabled: bool) {
        self.nodes.borrow_mut()[id].disabled = disabled;
    }

    pub fn detach(&self, id: usize) {
        self.nodes.borrow_mut()[id].connected = false;
    }
}

impl PageView for FakePage {
    type Element = usize;

    fn query_selector(&self, selector: &str) -> Option<usize> {
        self.query_selector_all(selector).into_iter().next()
    }

    fn query_selector_all(&self, selector: &str) -> Vec<usize> {
        self.nodes
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.connected && node.selectors.iter().any(|s| s == selector))
            .map(|(id, _)| id)
            .collect()
    }

    fn is_rendered(&self, element: &usize) -> bool {
        self.nodes.borrow()[*element].rendered
    }

    fn is_disabled(&self, element: &usize) -> bool {
        self.nodes.borrow()[*element].disabled
    }

    fn content_snapshot(&self, element: &usize) -> String {
        self.nodes.borrow()[*element].content.clone()
    }

    fn is_connected(&self, element: &usize) -> bool {
        self.nodes.borrow()[*element].connected
    }

    fn parent_element(&self, element: &usize) -> Option<usize> {
        self.nodes.borrow()[*element].parent
    }

    fn matches(&self, element: &usize, selector: &str) -> bool {
        self.nodes.borrow()[*element]
            .selectors
            .iter()
            .any(|s| s == selector)
    }
}

/// Player that only tracks calls.
#[derive(Default)]
pub struct FakePlayer {
    pub playing: Cell<bool>,
    pub starts: Cell<u32>,
    pub stops: Cell<u32>,
    pub refreshes: Cell<u32>,
}

impl TypingSound for FakePlayer {
    fn start_typing(&self) {
        self.starts.set(self.starts.get() + 1);
        self.playing.set(true);
    }

    fn stop_typing(&self) {
        self.stops.set(self.stops.get() + 1);
        self.playing.set(false);
    }

    fn is_playing(&self) -> bool {
        self.playing.get()
    }

    fn refresh_safety_net(&self) {
        self.refreshes.set(self.refreshes.get() + 1);
    }
}
