mod backend;
mod config;
mod error;
mod gpio;
mod pins;
mod routes;

pub use config::{AppConfig, Direction, Edge, HttpConfig, PinMode};
pub use error::AppError;
pub use gpio::{
    ChangeEvent, ChannelDescriptor, ClaimState, EventHandler, GpioBackend, GpioManager, PinWatch,
};
pub use routes::AppState;

pub use backend::MockBackend;
#[cfg(feature = "hardware-gpio")]
pub use backend::SysfsBackend;
