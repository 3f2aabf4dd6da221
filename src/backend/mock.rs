use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::{Direction, Edge};
use crate::error::AppError;
use crate::gpio::{ChangeEvent, EventHandler, GpioBackend, PinWatch, epoch_millis};

// In-memory stand-in for the gpio_sw tree. Pin entries appear on export and
// disappear on unexport, and every backend call is appended to an operation
// log so tests can assert call sequences.
#[derive(Default)]
pub struct MockBackend {
    shared: Arc<MockShared>,
}

struct MockShared {
    pins: RwLock<HashMap<String, Mutex<MockPinState>>>, // keyed by pin name
    ops: Mutex<Vec<String>>,
    board_info: RwLock<String>,
}

impl Default for MockShared {
    fn default() -> Self {
        Self {
            pins: RwLock::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
            board_info: RwLock::new(
                "Processor\t: ARMv7 Processor rev 4 (v7l)\nRevision\t: 0000000000000a20\nSerial\t\t: 5400000000000000\n"
                    .to_string(),
            ),
        }
    }
}

struct MockPinState {
    value: String, // raw contents of the data file
    watcher: Option<(u32, EventHandler)>,
}

impl MockPinState {
    fn fresh() -> Self {
        Self {
            value: "0".to_string(),
            watcher: None,
        }
    }
}

impl MockShared {
    fn set_raw_value(&self, pin: &str, raw: &str) {
        let pins = self.pins.read();
        let Some(entry) = pins.get(pin) else { return };

        let mut state = entry.lock();
        let changed = state.value != raw;
        state.value = raw.to_string();

        // Edge filtering is not applied: the platform accepts an edge
        // setting but fires on every transition.
        if changed && let Some((channel, handler)) = &state.watcher {
            handler.dispatch(ChangeEvent {
                channel: *channel,
                value: raw.trim() == "1",
                timestamp_ms: epoch_millis(),
            });
        }
    }
}

impl MockBackend {
    fn log(&self, entry: String) {
        self.shared.ops.lock().push(entry);
    }

    pub fn operations(&self) -> Vec<String> {
        self.shared.ops.lock().clone()
    }

    pub fn clear_operations(&self) {
        self.shared.ops.lock().clear();
    }

    pub fn set_board_info(&self, info: &str) {
        *self.shared.board_info.write() = info.to_string();
    }

    // Simulates a level change driven from outside the process, firing any
    // armed watcher the way a priority readiness event would.
    pub fn set_external_value(&self, pin: &str, value: bool) {
        self.shared.set_raw_value(pin, if value { "1" } else { "0" });
    }

    pub fn set_raw_value(&self, pin: &str, raw: &str) {
        self.shared.set_raw_value(pin, raw);
    }
}

fn missing_pin(op: &'static str, pin: &str) -> AppError {
    AppError::io(
        op,
        pin,
        std::io::Error::new(std::io::ErrorKind::NotFound, "no such pin entry"),
    )
}

impl GpioBackend for MockBackend {
    fn board_info(&self) -> Result<String, AppError> {
        self.log("board-info".to_string());
        Ok(self.shared.board_info.read().clone())
    }

    fn exists(&self, pin: &str) -> Result<bool, AppError> {
        self.log(format!("exists {pin}"));
        Ok(self.shared.pins.read().contains_key(pin))
    }

    fn export(&self, pin: &str) -> Result<(), AppError> {
        self.log(format!("export {pin}"));
        self.shared
            .pins
            .write()
            .entry(pin.to_string())
            .or_insert_with(|| Mutex::new(MockPinState::fresh()));
        Ok(())
    }

    fn unexport(&self, pin: &str) -> Result<(), AppError> {
        self.log(format!("unexport {pin}"));
        self.shared.pins.write().remove(pin);
        Ok(())
    }

    fn set_direction(&self, pin: &str, direction: Direction) -> Result<(), AppError> {
        self.log(format!("set-direction {pin} {}", direction.as_str()));
        Ok(())
    }

    fn set_edge(&self, pin: &str, edge: Edge) -> Result<(), AppError> {
        self.log(format!("set-edge {pin} {}", edge.as_str()));
        Ok(())
    }

    fn read_value(&self, pin: &str) -> Result<String, AppError> {
        self.log(format!("read {pin}"));
        let pins = self.shared.pins.read();
        let entry = pins.get(pin).ok_or_else(|| missing_pin("read", pin))?;
        Ok(entry.lock().value.clone())
    }

    fn write_value(&self, pin: &str, raw: &str) -> Result<(), AppError> {
        self.log(format!("write {pin} {raw}"));
        {
            let pins = self.shared.pins.read();
            pins.get(pin).ok_or_else(|| missing_pin("write", pin))?;
        }
        self.shared.set_raw_value(pin, raw);
        Ok(())
    }

    fn watch(
        &self,
        channel: u32,
        pin: &str,
        handler: EventHandler,
    ) -> Result<Box<dyn PinWatch>, AppError> {
        self.log(format!("watch {pin}"));
        let pins = self.shared.pins.read();
        let entry = pins.get(pin).ok_or_else(|| missing_pin("open", pin))?;
        entry.lock().watcher = Some((channel, handler));

        Ok(Box::new(MockWatch {
            shared: Arc::downgrade(&self.shared),
            pin: pin.to_string(),
        }))
    }
}

struct MockWatch {
    shared: Weak<MockShared>,
    pin: String,
}

impl PinWatch for MockWatch {}

impl Drop for MockWatch {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.ops.lock().push(format!("unwatch {}", self.pin));
        if let Some(entry) = shared.pins.read().get(&self.pin) {
            entry.lock().watcher = None;
        }
    }
}
