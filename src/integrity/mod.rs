//! Tamper-evident session telemetry.
//!
//! Accumulates focus, fullscreen, tab, and reload signals for the life of
//! the session and checkpoints them to the server with deduplication. The
//! signals are advisory for human reviewers; nothing here ever interrupts
//! the applicant, and delivery failures are swallowed by the engine.
//!
//! Counters and the cumulative blurred duration only ever increase. A
//! checkpoint whose payload matches the last delivered one (ignoring the
//! capture timestamp) is suppressed before it reaches the network.


use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Key under which the reload marker is persisted between page loads.
const RELOAD_MARKER_KEY: &str = "intervox.session_active";

/// Platform collaborator for the tiny bit of state that must survive a
/// page teardown (the reload marker). Browser embedders back this with
/// session storage; tests use a map.
pub trait StateStore: Send {
    fn read(&mut self, key: &str) -> Option<String>;
    fn write(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// Wire payload for checkpoints and the final submission. Matches the
/// server's `integrity_metadata` JSON field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySnapshot {
    pub fullscreen_exit_count: u32,
    pub fullscreen_exit_at: Vec<String>,
    pub focus_lost_count: u32,
    /// Total seconds the window spent without focus, across all losses.
    pub focus_lost_seconds: u64,
    pub tab_switch_count: u32,
    pub reload_count: u32,
    pub consent_acknowledged_at: Option<String>,
    pub captured_at: String,
}

impl IntegritySnapshot {
    /// The snapshot minus its capture timestamp, used to decide whether a
    /// checkpoint would say anything new.
    pub fn fingerprint(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("captured_at");
        }
        value
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accumulated integrity state. All signal handlers take `now` explicitly
/// so the accounting is testable without a clock.
pub struct IntegrityMonitor {
    consented_at: Option<DateTime<Utc>>,
    fullscreen_supported: bool,
    fullscreen_entered: bool,
    fullscreen_exits: Vec<DateTime<Utc>>,
    warned_fullscreen: bool,
    focus_lost_count: u32,
    focus_lost_seconds: u64,
    /// Start of the in-progress focus loss, whether it began as a window
    /// blur or a tab switch. At most one loss window is open at a time;
    /// that is what keeps blur and tab-switch mutually exclusive within one
    /// continuous loss.
    loss_since: Option<DateTime<Utc>>,
    tab_switch_count: u32,
    reload_count: u32,
    last_delivered: Option<serde_json::Value>,
}

impl Default for IntegrityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrityMonitor {
    pub fn new() -> Self {
        Self {
            consented_at: None,
            fullscreen_supported: false,
            fullscreen_entered: false,
            fullscreen_exits: Vec::new(),
            warned_fullscreen: false,
            focus_lost_count: 0,
            focus_lost_seconds: 0,
            loss_since: None,
            tab_switch_count: 0,
            reload_count: 0,
            last_delivered: None,
        }
    }

    pub fn consented(&self) -> bool {
        self.consented_at.is_some()
    }

    /// Record consent. First acknowledgment wins; tracking starts here.
    pub fn on_consent(&mut self, now: DateTime<Utc>) {
        if self.consented_at.is_none() {
            self.consented_at = Some(now);
            tracing::debug!("integrity_consent|at={}", rfc3339(now));
        }
    }

    /// Consume the reload marker a previous page load left behind. Called
    /// once during session load, before consent: the marker can only exist
    /// if a consented session wrote it on its way out.
    pub fn on_load(&mut self, store: &mut dyn StateStore) {
        if store.read(RELOAD_MARKER_KEY).is_some() {
            store.remove(RELOAD_MARKER_KEY);
            self.reload_count += 1;
            tracing::debug!("integrity_reload|count={}", self.reload_count);
        }
    }

    pub fn set_fullscreen_supported(&mut self, supported: bool) {
        self.fullscreen_supported = supported;
    }

    pub fn on_fullscreen_entered(&mut self) {
        if self.consented() {
            self.fullscreen_entered = true;
        }
    }

    /// Count a fullscreen exit. Exits from a state that was never
    /// fullscreen (unsupported platform, or no prior enter) do not count.
    /// Returns true when the UI should show the warning banner, which
    /// happens only on the first counted exit.
    pub fn on_fullscreen_exited(&mut self, now: DateTime<Utc>) -> bool {
        if !self.consented() || !self.fullscreen_supported || !self.fullscreen_entered {
            return false;
        }
        self.fullscreen_entered = false;
        self.fullscreen_exits.push(now);
        let first = !self.warned_fullscreen;
        self.warned_fullscreen = true;
        tracing::debug!(
            "integrity_fullscreen_exit|count={}",
            self.fullscreen_exits.len()
        );
        first
    }

    /// Window lost focus. Ignored while a loss window is already open; a
    /// blur following a tab switch is the same continuous loss.
    pub fn on_focus_lost(&mut self, now: DateTime<Utc>) {
        if !self.consented() || self.loss_since.is_some() {
            return;
        }
        self.focus_lost_count += 1;
        self.loss_since = Some(now);
    }

    /// Tab hidden. Increments only the switch counter when focus is
    /// already lost; otherwise it also opens the loss window so blurred
    /// seconds keep accruing.
    pub fn on_tab_hidden(&mut self, now: DateTime<Utc>) {
        if !self.consented() {
            return;
        }
        self.tab_switch_count += 1;
        if self.loss_since.is_none() {
            self.loss_since = Some(now);
        }
    }

    /// Focus or visibility came back; close the loss window.
    pub fn on_focus_regained(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.loss_since.take() {
            self.focus_lost_seconds += elapsed_secs(since, now);
        }
    }

    /// Leave a marker for the next page load and report whether a
    /// checkpoint should be attempted via the teardown path.
    pub fn on_page_hide(&mut self, store: &mut dyn StateStore) {
        if !self.consented() {
            return;
        }
        store.write(RELOAD_MARKER_KEY, "1");
    }

    /// Current totals with any in-progress loss closed out as of `now`.
    /// Reading does not mutate; the open loss window keeps running.
    pub fn snapshot(&self, now: DateTime<Utc>) -> IntegritySnapshot {
        let mut focus_lost_seconds = self.focus_lost_seconds;
        if let Some(since) = self.loss_since {
            focus_lost_seconds += elapsed_secs(since, now);
        }
        IntegritySnapshot {
            fullscreen_exit_count: self.fullscreen_exits.len() as u32,
            fullscreen_exit_at: self.fullscreen_exits.iter().map(|at| rfc3339(*at)).collect(),
            focus_lost_count: self.focus_lost_count,
            focus_lost_seconds,
            tab_switch_count: self.tab_switch_count,
            reload_count: self.reload_count,
            consent_acknowledged_at: self.consented_at.map(rfc3339),
            captured_at: rfc3339(now),
        }
    }

    /// Build the next checkpoint, or `None` when it would repeat the last
    /// delivered one (everything equal except `captured_at`).
    pub fn checkpoint(&self, now: DateTime<Utc>) -> Option<IntegritySnapshot> {
        let snapshot = self.snapshot(now);
        if self.last_delivered.as_ref() == Some(&snapshot.fingerprint()) {
            return None;
        }
        Some(snapshot)
    }

    /// Record that `snapshot` reached the server, arming the suppression
    /// for the next unchanged checkpoint.
    pub fn mark_delivered(&mut self, snapshot: &IntegritySnapshot) {
        self.last_delivered = Some(snapshot.fingerprint());
    }
}

fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    now.signed_duration_since(since).num_seconds().max(0) as u64
}
