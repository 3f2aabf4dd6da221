use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{AppConfig, Direction, Edge, PinMode};
use crate::error::AppError;
use crate::pins::{self, PinTable};

pub type GpioManager<B> = GenericGpioManager<B>;

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub channel: u32,
    pub value: bool,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimState {
    None,
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelDescriptor {
    pub pin: String,
    pub claimed: ClaimState,
    pub listening: bool,
}

pub struct EventCallbackHandler {
    event_tx: broadcast::Sender<ChangeEvent>,
    event_history: FxHashMap<u32, RwLock<VecDeque<ChangeEvent>>>,
    event_history_capacity: usize,
}

impl EventCallbackHandler {
    fn new(broadcast_capacity: usize, event_history_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity);

        let mut event_history = FxHashMap::default();
        for (channel, _) in pins::PINS_V1 {
            event_history.insert(*channel, RwLock::new(VecDeque::new()));
        }

        Self {
            event_tx,
            event_history,
            event_history_capacity,
        }
    }

    pub fn dispatch(&self, event: ChangeEvent) {
        {
            let event = event.clone();
            if let Some(history_lock) = self.event_history.get(&event.channel) {
                let mut history = history_lock.write();
                while history.len() >= self.event_history_capacity {
                    history.pop_front();
                }
                history.push_back(event);
            }
        }
        let _ = self.event_tx.send(event);
    }
}

pub type EventHandler = Arc<EventCallbackHandler>;

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// Registration guard for a watched pin. Dropping it deregisters the watch
// and closes the underlying value handle exactly once.
pub trait PinWatch: Send {}

pub trait GpioBackend: Send + Sync {
    fn board_info(&self) -> Result<String, AppError>;
    fn exists(&self, pin: &str) -> Result<bool, AppError>;
    fn export(&self, pin: &str) -> Result<(), AppError>;
    fn unexport(&self, pin: &str) -> Result<(), AppError>;
    fn set_direction(&self, pin: &str, direction: Direction) -> Result<(), AppError>;
    fn set_edge(&self, pin: &str, edge: Edge) -> Result<(), AppError>;
    fn read_value(&self, pin: &str) -> Result<String, AppError>;
    fn write_value(&self, pin: &str, raw: &str) -> Result<(), AppError>;
    fn watch(
        &self,
        channel: u32,
        pin: &str,
        handler: EventHandler,
    ) -> Result<Box<dyn PinWatch>, AppError>;
}

// A pin lives in at most one of the two sets; claiming moves it.
#[derive(Default)]
struct ClaimRegistry {
    exported_input_pins: FxHashSet<String>,
    exported_output_pins: FxHashSet<String>,
}

impl ClaimRegistry {
    fn claim(&mut self, pin: &str, direction: Direction) {
        self.exported_input_pins.remove(pin);
        self.exported_output_pins.remove(pin);
        match direction {
            Direction::In => self.exported_input_pins.insert(pin.to_string()),
            Direction::Out => self.exported_output_pins.insert(pin.to_string()),
        };
    }

    fn state(&self, pin: &str) -> ClaimState {
        if self.exported_input_pins.contains(pin) {
            ClaimState::Input
        } else if self.exported_output_pins.contains(pin) {
            ClaimState::Output
        } else {
            ClaimState::None
        }
    }

    fn release(&mut self, pin: &str) {
        self.exported_input_pins.remove(pin);
        self.exported_output_pins.remove(pin);
    }

    fn pins(&self) -> Vec<String> {
        self.exported_input_pins
            .iter()
            .chain(self.exported_output_pins.iter())
            .cloned()
            .collect()
    }

    fn clear(&mut self) {
        self.exported_input_pins.clear();
        self.exported_output_pins.clear();
    }
}

pub struct GenericGpioManager<B: GpioBackend> {
    config: Arc<AppConfig>,
    backend: Arc<B>,
    table: Mutex<Option<&'static PinTable>>,
    claims: RwLock<ClaimRegistry>,
    watchers: Mutex<FxHashMap<String, Box<dyn PinWatch>>>,
    event_handler: RwLock<EventHandler>,
}

impl<B: GpioBackend> GenericGpioManager<B> {
    pub fn new(config: Arc<AppConfig>, backend: Arc<B>) -> Self {
        let event_handler = Arc::new(EventCallbackHandler::new(
            config.broadcast_capacity,
            config.event_history_capacity,
        ));

        Self {
            config,
            backend,
            table: Mutex::new(None),
            claims: RwLock::new(ClaimRegistry::default()),
            watchers: Mutex::new(FxHashMap::default()),
            event_handler: RwLock::new(event_handler),
        }
    }

    // Opi is the only supported reference mode. Anything else is rejected
    // and the resolver stays on the default.
    pub fn set_mode(&self, mode: PinMode) -> Result<(), AppError> {
        match mode {
            PinMode::Opi => Ok(()),
            PinMode::Bcm => Err(AppError::InvalidMode(mode.as_str().to_string())),
        }
    }

    // The lock is held across the probe, so a setup racing with an in-flight
    // probe waits for it instead of re-running the detection.
    fn resolve(&self, channel: u32) -> Result<String, AppError> {
        let mut table = self.table.lock();
        let active = match *table {
            Some(active) => active,
            None => {
                let info = self.backend.board_info()?;
                let revision =
                    pins::parse_revision(&info).ok_or(AppError::RevisionUnreadable)?;
                debug!("seen hardware revision {revision:#06x}");
                let active = pins::table_for_revision(revision);
                *table = Some(active);
                active
            }
        };

        pins::lookup(active, channel)
            .map(str::to_string)
            .ok_or(AppError::UnmappedChannel(channel))
    }

    // A pin left exported by a crashed prior process is unexported first so
    // the export starts from a clean state.
    fn ensure_exported(&self, pin: &str) -> Result<(), AppError> {
        if self.backend.exists(pin)? {
            self.backend.unexport(pin)?;
        }
        self.backend.export(pin)
    }

    // At most one registration per pin: a stale watch is dropped, which
    // deregisters it and closes its handle, before the new one is armed.
    fn listen(&self, channel: u32, pin: &str) -> Result<(), AppError> {
        let handler = self.event_handler.read().clone();
        let mut watchers = self.watchers.lock();
        watchers.remove(pin);
        let watch = self.backend.watch(channel, pin, handler)?;
        watchers.insert(pin.to_string(), watch);
        Ok(())
    }

    pub async fn setup(
        &self,
        channel: u32,
        direction: Direction,
        edge: Edge,
    ) -> Result<(), AppError> {
        let pin = self.resolve(channel)?;
        debug!("set up pin {pin} as {} (edge {})", direction.as_str(), edge.as_str());

        self.ensure_exported(&pin)?;
        self.claims.write().claim(&pin, direction);
        self.backend.set_edge(&pin, edge)?;
        self.backend.set_direction(&pin, direction)?;
        self.listen(channel, &pin)
    }

    pub async fn write_value(&self, channel: u32, value: bool) -> Result<(), AppError> {
        let pin = self.resolve(channel)?;
        if self.claims.read().state(&pin) != ClaimState::Output {
            return Err(AppError::NotExported(channel));
        }

        let raw = if value { "1" } else { "0" };
        debug!("writing pin {pin} with value {raw}");
        self.backend.write_value(&pin, raw)
    }

    // Reading back an output pin is allowed.
    pub async fn read_value(&self, channel: u32) -> Result<bool, AppError> {
        let pin = self.resolve(channel)?;
        if self.claims.read().state(&pin) == ClaimState::None {
            return Err(AppError::NotExported(channel));
        }

        let raw = self.backend.read_value(&pin)?;
        // An empty or whitespace-only value file reads as low.
        Ok(raw.trim() == "1")
    }

    // Tears down every claimed pin: unlisten, then unexport, sequentially
    // per pin. All pins are attempted even if one fails; the first error is
    // reported. Event subscribers are left connected.
    pub async fn destroy(&self) -> Result<(), AppError> {
        let pins = self.claims.read().pins();
        let mut first_error = None;

        let mut watchers = self.watchers.lock();
        for pin in &pins {
            watchers.remove(pin);
            if let Err(err) = self.backend.unexport(pin)
                && first_error.is_none()
            {
                first_error = Some(err);
            }
            self.claims.write().release(pin);
        }
        drop(watchers);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // Every state lock is held at once so no interleaved call observes a
    // partially cleared module. Dropping the watchers closes their handles.
    pub fn reset(&self) {
        let mut watchers = self.watchers.lock();
        let mut claims = self.claims.write();
        let mut table = self.table.lock();
        let mut handler = self.event_handler.write();

        watchers.clear();
        claims.clear();
        *table = None;
        *handler = Arc::new(EventCallbackHandler::new(
            self.config.broadcast_capacity,
            self.config.event_history_capacity,
        ));
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.event_handler.read().event_tx.subscribe()
    }

    pub async fn list_channels(&self) -> HashMap<u32, ChannelDescriptor> {
        let watchers = self.watchers.lock();
        let claims = self.claims.read();

        pins::PINS_V1
            .iter()
            .map(|(channel, pin)| {
                (
                    *channel,
                    ChannelDescriptor {
                        pin: (*pin).to_string(),
                        claimed: claims.state(pin),
                        listening: watchers.contains_key(*pin),
                    },
                )
            })
            .collect()
    }

    pub async fn channel_descriptor(&self, channel: u32) -> Result<ChannelDescriptor, AppError> {
        let pin =
            pins::lookup(pins::PINS_V1, channel).ok_or(AppError::UnmappedChannel(channel))?;
        let watchers = self.watchers.lock();
        let claims = self.claims.read();

        Ok(ChannelDescriptor {
            pin: pin.to_string(),
            claimed: claims.state(pin),
            listening: watchers.contains_key(pin),
        })
    }

    pub async fn channel_events(
        &self,
        channel: u32,
        limit: Option<usize>,
    ) -> Result<Vec<ChangeEvent>, AppError> {
        pins::lookup(pins::PINS_V1, channel).ok_or(AppError::UnmappedChannel(channel))?;
        let handler = self.event_handler.read();

        Ok(handler
            .event_history
            .get(&channel)
            .map(|d| {
                let events: Vec<ChangeEvent> = if let Some(lim) = limit {
                    d.read().iter().rev().take(lim).cloned().collect()
                } else {
                    d.read().iter().rev().cloned().collect()
                };
                // oldest first
                events.into_iter().rev().collect()
            })
            .unwrap_or_default())
    }

    pub async fn last_event(&self, channel: u32) -> Result<Option<ChangeEvent>, AppError> {
        pins::lookup(pins::PINS_V1, channel).ok_or(AppError::UnmappedChannel(channel))?;
        let handler = self.event_handler.read();

        Ok(handler
            .event_history
            .get(&channel)
            .and_then(|d| d.read().back().cloned()))
    }
}
