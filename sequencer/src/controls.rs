//! Operator controls shared with the UI layer
//!
//! The UI owns the real widgets; the sequencer only sees these handles. Button
//! clicks are counted rather than latched so node logic can detect each click
//! exactly once, no matter how many ticks pass between clicks.

use crate::blackboard::{Blackboard, BlackboardValue, ValueKind};
use crate::error::ConfigurationError;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed blackboard keys under which the control panel is published
pub mod keys {
    pub const RESET: &str = "reset";
    pub const HALT: &str = "halt";
    pub const BACK: &str = "back";
    pub const SCAN: &str = "scan";
    pub const TOOL_PATH_PLAN: &str = "tpp";
    pub const MOTION_PLAN: &str = "plan";
    pub const MOTION_EXECUTE: &str = "execute";
    pub const PROGRESS_BAR: &str = "progress_bar";
    pub const STACKED_WIDGET: &str = "stacked_widget";

    /// Button keys every workflow blackboard must carry
    pub const BUTTONS: [&str; 7] = [
        RESET,
        HALT,
        BACK,
        SCAN,
        TOOL_PATH_PLAN,
        MOTION_PLAN,
        MOTION_EXECUTE,
    ];
}

#[derive(Debug)]
struct ButtonState {
    label: String,
    enabled: AtomicBool,
    clicks: AtomicU64,
}

/// Handle to an operator button
#[derive(Debug, Clone)]
pub struct ButtonHandle {
    inner: Arc<ButtonState>,
}

impl ButtonHandle {
    /// Create a disabled button
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ButtonState {
                label: label.into(),
                enabled: AtomicBool::new(false),
                clicks: AtomicU64::new(0),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Register a click from the UI.
    ///
    /// Returns false when the button is disabled; such clicks are dropped.
    pub fn click(&self) -> bool {
        if !self.is_enabled() {
            tracing::debug!("Ignoring click on disabled button '{}'", self.inner.label);
            return false;
        }
        self.inner.clicks.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Total number of accepted clicks since the button was created
    pub fn click_count(&self) -> u64 {
        self.inner.clicks.load(Ordering::Acquire)
    }

    /// True when both handles refer to the same button
    pub fn same_button(&self, other: &ButtonHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Handle to a 0-100 progress indicator
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    value: Arc<AtomicU8>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u8 {
        self.value.load(Ordering::Acquire)
    }

    /// Set the indicator, clamping to 0-100
    pub fn set(&self, value: f64) {
        let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) };
        self.value.store(clamped.round() as u8, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct PageState {
    current: AtomicUsize,
    switches: AtomicU64,
}

/// Handle to the paged (stacked) view of the workflow UI
#[derive(Debug, Clone, Default)]
pub struct PageHandle {
    inner: Arc<PageState>,
}

impl PageHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::Acquire)
    }

    /// Switch to `index`. Returns false (and does nothing) if already there.
    pub fn set_current(&self, index: usize) -> bool {
        let previous = self.inner.current.swap(index, Ordering::AcqRel);
        if previous == index {
            return false;
        }
        self.inner.switches.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Number of effective page switches so far
    pub fn switch_count(&self) -> u64 {
        self.inner.switches.load(Ordering::Acquire)
    }
}

/// Every control the workflow needs, injected into the blackboard at
/// construction instead of being looked up globally.
#[derive(Debug, Clone)]
pub struct ControlPanel {
    pub start: ButtonHandle,
    pub reset: ButtonHandle,
    pub halt: ButtonHandle,
    pub back: ButtonHandle,
    pub scan: ButtonHandle,
    pub tool_path_plan: ButtonHandle,
    pub motion_plan: ButtonHandle,
    pub motion_execute: ButtonHandle,
    pub progress: ProgressHandle,
    pub page: PageHandle,
}

impl ControlPanel {
    pub fn new() -> Self {
        Self {
            start: ButtonHandle::new("Start"),
            reset: ButtonHandle::new("Reset"),
            halt: ButtonHandle::new("Halt"),
            back: ButtonHandle::new("Back"),
            scan: ButtonHandle::new("Scan"),
            tool_path_plan: ButtonHandle::new("Tool Path Plan"),
            motion_plan: ButtonHandle::new("Motion Plan"),
            motion_execute: ButtonHandle::new("Motion Execute"),
            progress: ProgressHandle::new(),
            page: PageHandle::new(),
        }
    }

    /// Publish the tree-facing controls under their fixed keys.
    ///
    /// The start button stays with the control context and is not published.
    pub fn install(&self, blackboard: &Blackboard) {
        let buttons = [
            (keys::RESET, &self.reset),
            (keys::HALT, &self.halt),
            (keys::BACK, &self.back),
            (keys::SCAN, &self.scan),
            (keys::TOOL_PATH_PLAN, &self.tool_path_plan),
            (keys::MOTION_PLAN, &self.motion_plan),
            (keys::MOTION_EXECUTE, &self.motion_execute),
        ];
        for (key, button) in buttons {
            blackboard.set(key, BlackboardValue::Button(button.clone()));
        }
        blackboard.set(keys::PROGRESS_BAR, BlackboardValue::Progress(self.progress.clone()));
        blackboard.set(keys::STACKED_WIDGET, BlackboardValue::Page(self.page.clone()));
    }
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a blackboard carries the complete control set
pub fn validate_controls(blackboard: &Blackboard) -> Result<(), ConfigurationError> {
    for key in keys::BUTTONS {
        require_control(blackboard, key, ValueKind::Button)?;
    }
    require_control(blackboard, keys::PROGRESS_BAR, ValueKind::Progress)?;
    require_control(blackboard, keys::STACKED_WIDGET, ValueKind::Page)?;
    Ok(())
}

/// Check that `key` holds a control of the expected kind
pub fn require_control(
    blackboard: &Blackboard,
    key: &str,
    expected: ValueKind,
) -> Result<(), ConfigurationError> {
    match blackboard.kind_of(key) {
        None => Err(ConfigurationError::MissingControl(key.to_string())),
        Some(found) if found != expected => Err(ConfigurationError::ControlKindMismatch {
            key: key.to_string(),
            expected,
            found,
        }),
        Some(_) => Ok(()),
    }
}
