use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use netspeed::{
    EngineEvent, NetworkClass, ProgressSample, TestConfig, TestId, TestKind, TestResult,
};
use std::collections::VecDeque;
use std::time::Duration;

const MAX_SAMPLES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Options,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }

    pub fn kind(self) -> TestKind {
        match self {
            Panel::Download => TestKind::Download,
            Panel::Upload => TestKind::Upload,
            Panel::Ping => TestKind::Ping,
        }
    }
}

/// Per-test knobs adjustable from the options view.
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub ping_count: u32,
    pub duration_secs: u64,
    pub report_interval_ms: u64,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            ping_count: 10,
            duration_secs: 15,
            report_interval_ms: 250,
        }
    }
}

impl TestOptions {
    pub fn config_for(&self, kind: TestKind) -> TestConfig {
        let config = TestConfig::default()
            .with_timeout(Duration::from_secs(self.duration_secs))
            .with_report_interval(Duration::from_millis(self.report_interval_ms));
        match kind {
            TestKind::Ping => config
                .with_timeout(Duration::from_secs(2))
                .with_sample_count(self.ping_count),
            _ => config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionField {
    PingCount,
    Duration,
    ReportInterval,
}

impl OptionField {
    pub fn next(self) -> Self {
        match self {
            OptionField::PingCount => OptionField::Duration,
            OptionField::Duration => OptionField::ReportInterval,
            OptionField::ReportInterval => OptionField::PingCount,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            OptionField::PingCount => OptionField::ReportInterval,
            OptionField::Duration => OptionField::PingCount,
            OptionField::ReportInterval => OptionField::Duration,
        }
    }
}

/// What one panel has seen of its test kind.
#[derive(Debug, Clone, Default)]
pub struct PanelState {
    pub samples: Vec<f64>,
    pub progress: f64,
    pub result: Option<TestResult>,
    pub error: Option<String>,
}

impl PanelState {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn push(&mut self, value: f64) {
        self.samples.push(value);
        if self.samples.len() > MAX_SAMPLES {
            self.samples.remove(0);
        }
    }
}

pub struct App {
    pub should_quit: bool,
    pub running: Option<(TestId, TestKind)>,
    pub network: NetworkClass,
    pub status: Option<String>,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,

    pub options: TestOptions,
    pub selected_option: OptionField,

    pub download: PanelState,
    pub upload: PanelState,
    pub ping: PanelState,

    queue: VecDeque<TestKind>,
}

impl App {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            running: None,
            network: NetworkClass::Unknown,
            status: None,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            options: TestOptions::default(),
            selected_option: OptionField::PingCount,
            download: PanelState::default(),
            upload: PanelState::default(),
            ping: PanelState::default(),
            queue: VecDeque::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none()
    }

    pub fn panel(&self, kind: TestKind) -> &PanelState {
        match kind {
            TestKind::Download => &self.download,
            TestKind::Upload => &self.upload,
            TestKind::Ping => &self.ping,
        }
    }

    fn panel_mut(&mut self, kind: TestKind) -> &mut PanelState {
        match kind {
            TestKind::Download => &mut self.download,
            TestKind::Upload => &mut self.upload,
            TestKind::Ping => &mut self.ping,
        }
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Options => self.handle_options_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('o') => {
                if self.is_idle() {
                    self.view = AppView::Options;
                }
                None
            }
            KeyCode::Char('n') => Some(AppAction::RefreshNetwork),
            KeyCode::Char('a') => {
                if self.is_idle() {
                    self.queue =
                        VecDeque::from([TestKind::Ping, TestKind::Download, TestKind::Upload]);
                    Some(AppAction::StartQueued)
                } else {
                    None
                }
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.is_idle() {
                    self.queue = VecDeque::from([self.selected_panel.kind()]);
                    Some(AppAction::StartQueued)
                } else {
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if !self.is_idle() {
                    self.queue.clear();
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_options_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.view = AppView::Main;
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_option = self.selected_option.prev();
                None
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_option = self.selected_option.next();
                None
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.decrease_option();
                None
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.increase_option();
                None
            }
            _ => None,
        }
    }

    fn increase_option(&mut self) {
        let options = &mut self.options;
        match self.selected_option {
            OptionField::PingCount => options.ping_count = (options.ping_count + 5).min(100),
            OptionField::Duration => options.duration_secs = (options.duration_secs + 5).min(120),
            OptionField::ReportInterval => {
                options.report_interval_ms = (options.report_interval_ms + 250).min(2_000)
            }
        }
    }

    fn decrease_option(&mut self) {
        let options = &mut self.options;
        match self.selected_option {
            OptionField::PingCount => {
                options.ping_count = options.ping_count.saturating_sub(5).max(1)
            }
            OptionField::Duration => {
                options.duration_secs = options.duration_secs.saturating_sub(5).max(5)
            }
            OptionField::ReportInterval => {
                options.report_interval_ms = options.report_interval_ms.saturating_sub(250).max(250)
            }
        }
    }

    /// Next test to start, once the engine is idle.
    pub fn pop_queued(&mut self) -> Option<TestKind> {
        if self.is_idle() {
            self.queue.pop_front()
        } else {
            None
        }
    }

    pub fn begin_test(&mut self, id: TestId, kind: TestKind) {
        self.panel_mut(kind).reset();
        self.running = Some((id, kind));
        self.status = None;
        self.expanded = false;
    }

    pub fn start_failed(&mut self, kind: TestKind, message: String) {
        self.queue.clear();
        self.panel_mut(kind).error = Some(message.clone());
        self.status = Some(message);
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        // Events of a test we did not start (or already closed) are stale.
        if self.running.map(|(id, _)| id) != Some(event.test_id()) {
            return;
        }

        match event {
            EngineEvent::CompleteEpoch { kind, sample, .. } => self.update_progress(kind, sample),
            EngineEvent::CompleteTest { kind, result, .. } => {
                let panel = self.panel_mut(kind);
                panel.progress = 1.0;
                panel.result = Some(result);
                self.running = None;
            }
            EngineEvent::ErrorTest { kind, error, .. } => {
                self.queue.clear();
                self.panel_mut(kind).error = Some(error.to_string());
                self.status = Some(format!("{kind} failed: {error}"));
                self.running = None;
            }
            EngineEvent::TestCanceled { kind, .. } => {
                self.queue.clear();
                self.panel_mut(kind).progress = 0.0;
                self.status = Some(format!("{kind} cancelled"));
                self.running = None;
            }
        }
    }

    fn update_progress(&mut self, kind: TestKind, sample: ProgressSample) {
        let panel = self.panel_mut(kind);
        panel.progress = sample.elapsed_percent / 100.0;
        match kind {
            TestKind::Ping => {
                if let Some(ms) = sample.latency_ms {
                    panel.push(ms);
                }
            }
            _ => panel.push(sample.speed_mbps),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartQueued,
    CancelTest,
    RefreshNetwork,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyModifiers};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn complete(id: u64, kind: TestKind) -> EngineEvent {
        EngineEvent::CompleteTest {
            test: TestId(id),
            kind,
            result: TestResult {
                kind,
                speed_mbps: 12.5,
                latency_ms: None,
                jitter_ms: None,
                bytes: 1_000,
                elapsed: Duration::from_millis(640),
            },
        }
    }

    #[test]
    fn run_all_queues_ping_download_upload() {
        let mut app = App::new();
        assert!(matches!(
            app.handle_key_event(press(KeyCode::Char('a'))),
            Some(AppAction::StartQueued)
        ));

        for (id, kind) in [(1, TestKind::Ping), (2, TestKind::Download), (3, TestKind::Upload)] {
            assert_eq!(app.pop_queued(), Some(kind));
            app.begin_test(TestId(id), kind);
            assert_eq!(app.pop_queued(), None);
            app.handle_event(complete(id, kind));
            assert!(app.is_idle());
        }
        assert_eq!(app.pop_queued(), None);
        assert_eq!(app.upload.result.as_ref().map(|r| r.bytes), Some(1_000));
    }

    #[test]
    fn cancel_clears_the_run_all_queue() {
        let mut app = App::new();
        app.handle_key_event(press(KeyCode::Char('a')));
        assert_eq!(app.pop_queued(), Some(TestKind::Ping));
        app.begin_test(TestId(1), TestKind::Ping);

        app.handle_event(EngineEvent::TestCanceled {
            test: TestId(1),
            kind: TestKind::Ping,
        });
        assert!(app.is_idle());
        assert_eq!(app.pop_queued(), None);
    }

    #[test]
    fn stale_events_are_ignored() {
        let mut app = App::new();
        app.begin_test(TestId(2), TestKind::Download);
        app.handle_event(EngineEvent::TestCanceled {
            test: TestId(1),
            kind: TestKind::Download,
        });
        assert_eq!(app.running, Some((TestId(2), TestKind::Download)));
    }

    #[test]
    fn ping_config_uses_probe_count() {
        let options = TestOptions::default();
        let config = options.config_for(TestKind::Ping);
        assert_eq!(config.sample_count, Some(options.ping_count));
        assert_eq!(options.config_for(TestKind::Upload).timeout(), Duration::from_secs(15));
    }
}
