//! Observable session state.
//!
//! The session publishes an [`ObservableState`] snapshot through a
//! `tokio::sync::watch` channel after every transition, and every decoded
//! temperature through a broadcast channel so no reading is coalesced away.

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::data::{PeriodSetting, TemperatureReading};

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Scanning for a micro:bit.
    Scanning,
    /// Connecting to a candidate.
    Connecting,
    /// Discovering the temperature service.
    DiscoveringServices,
    /// Discovering the temperature and period characteristics.
    DiscoveringCharacteristics,
    /// Enabling temperature notifications.
    SubscribingNotifications,
    /// Connected and receiving temperatures.
    Ready,
    /// Tearing down the connection.
    Disconnecting,
}

impl SessionState {
    /// Check if the session is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        !matches!(self, Self::Idle | Self::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::DiscoveringCharacteristics => write!(f, "DiscoveringCharacteristics"),
            Self::SubscribingNotifications => write!(f, "SubscribingNotifications"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// State record read by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObservableState {
    /// Whether a scan is running.
    pub is_scanning: bool,
    /// Name of the connected micro:bit. Set only while ready.
    pub peripheral_name: Option<String>,
    /// Latest temperature notification.
    pub temperature: Option<TemperatureReading>,
    /// Latest period read from the peripheral.
    pub period: Option<PeriodSetting>,
    /// Inverts on every temperature notification.
    pub period_blink: bool,
    /// Most recent user-visible error.
    pub last_error: Option<String>,
    /// Current lifecycle state.
    pub session: SessionState,
}

/// Temperature update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureUpdate {
    /// The decoded reading.
    pub temperature: TemperatureReading,
    /// Value of `period_blink` after this reading.
    pub period_blink: bool,
}

/// Write side of the observable state. Owned by the session task.
pub(crate) struct StatePublisher {
    state_tx: watch::Sender<ObservableState>,
    temperature_tx: broadcast::Sender<TemperatureUpdate>,
}

impl StatePublisher {
    pub(crate) fn new(notification_buffer: usize) -> Self {
        let (state_tx, _) = watch::channel(ObservableState::default());
        let (temperature_tx, _) = broadcast::channel(notification_buffer);
        Self {
            state_tx,
            temperature_tx,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ObservableState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn subscribe_temperatures(&self) -> broadcast::Receiver<TemperatureUpdate> {
        self.temperature_tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> ObservableState {
        self.state_tx.borrow().clone()
    }

    pub(crate) fn session(&self) -> SessionState {
        self.state_tx.borrow().session
    }

    /// Apply a change and notify watchers if anything changed.
    pub(crate) fn update(&self, f: impl FnOnce(&mut ObservableState)) {
        self.state_tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }

    /// Move to a new lifecycle state.
    pub(crate) fn transition(&self, next: SessionState) {
        let previous = self.session();
        if previous != next {
            debug!("Session state changed: {} -> {}", previous, next);
        }
        self.update(|state| state.session = next);
    }

    /// Reset for a fresh connect and enter `Scanning` in one update.
    pub(crate) fn begin_scan(&self) {
        debug!("Session state changed: {} -> Scanning", self.session());
        self.update(|state| {
            state.temperature = None;
            state.period = None;
            state.period_blink = false;
            state.last_error = None;
            state.peripheral_name = None;
            state.is_scanning = true;
            state.session = SessionState::Scanning;
        });
    }

    pub(crate) fn set_scanning(&self, is_scanning: bool) {
        self.update(|state| state.is_scanning = is_scanning);
    }

    pub(crate) fn set_period(&self, period: PeriodSetting) {
        self.update(|state| state.period = Some(period));
    }

    pub(crate) fn set_error(&self, message: String) {
        self.update(|state| state.last_error = Some(message));
    }

    pub(crate) fn ready(&self, name: String) {
        self.update(|state| {
            state.peripheral_name = Some(name);
            state.session = SessionState::Ready;
        });
        debug!("Session state changed: -> Ready");
    }

    /// Record a reading, flip the blink flag and broadcast the update.
    pub(crate) fn record_temperature(&self, temperature: TemperatureReading) {
        let mut period_blink = false;
        self.update(|state| {
            state.temperature = Some(temperature);
            state.period_blink = !state.period_blink;
            period_blink = state.period_blink;
        });
        let _ = self.temperature_tx.send(TemperatureUpdate {
            temperature,
            period_blink,
        });
    }

    /// Drop every peripheral-dependent field and return to idle.
    pub(crate) fn clear(&self) {
        self.leave(SessionState::Idle, None);
    }

    /// Return to idle and record why, in a single update.
    pub(crate) fn fail(&self, message: String) {
        self.leave(SessionState::Idle, Some(message));
    }

    /// Enter `Disconnecting` with the peripheral fields already dropped.
    pub(crate) fn begin_disconnect(&self) {
        self.leave(SessionState::Disconnecting, None);
    }

    fn leave(&self, next: SessionState, error: Option<String>) {
        let previous = self.session();
        if previous != next {
            debug!("Session state changed: {} -> {}", previous, next);
        }
        self.update(|state| {
            state.is_scanning = false;
            state.peripheral_name = None;
            state.temperature = None;
            state.period = None;
            if error.is_some() {
                state.last_error = error;
            }
            state.session = next;
        });
    }
}
