use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::config::{AppConfig, Direction, Edge};
use crate::error::AppError;
use crate::gpio::{ChangeEvent, EventHandler, GpioBackend, PinWatch, epoch_millis};

const SYSFS_BACKEND_WAIT_TIMEOUT_MS: u16 = 10;

// Backend over the sunxi gpio_sw tree, where each pin is a directory with a
// single `data` value file that supports priority readiness notification.
pub struct SysfsBackend {
    root: PathBuf,
    cpuinfo: PathBuf,
}

impl SysfsBackend {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        if !config.gpio_path.is_dir() {
            return Err(AppError::Config(format!(
                "gpio path {} is not a directory",
                config.gpio_path.display()
            )));
        }

        Ok(Self {
            root: config.gpio_path.clone(),
            cpuinfo: config.cpuinfo_path.clone(),
        })
    }

    fn data_path(&self, pin: &str) -> PathBuf {
        self.root.join(pin).join("data")
    }
}

struct PinWatcher {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PinWatch for PinWatcher {}

impl Drop for PinWatcher {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// Consumes the pending interrupt with a one-byte read at offset zero. The
// facility only reports the next priority event after this read, and the
// byte it returns is the pin's current level.
fn clear_interrupt(file: &File) -> std::io::Result<Option<bool>> {
    let mut buf = [0u8; 1];
    let n = file.read_at(&mut buf, 0)?;
    Ok((n > 0).then(|| buf[0] == b'1'))
}

impl GpioBackend for SysfsBackend {
    fn board_info(&self) -> Result<String, AppError> {
        fs::read_to_string(&self.cpuinfo)
            .map_err(|e| AppError::io("read board info", self.cpuinfo.display().to_string(), e))
    }

    fn exists(&self, pin: &str) -> Result<bool, AppError> {
        Ok(self.root.join(pin).is_dir())
    }

    // The gpio_sw tree auto-creates every pin entry, so export and unexport
    // have nothing to write. They stay in the call sequence so a platform
    // with a real export interface only needs a local change here.
    fn export(&self, pin: &str) -> Result<(), AppError> {
        debug!("no need to export pin {pin}");
        Ok(())
    }

    fn unexport(&self, pin: &str) -> Result<(), AppError> {
        debug!("no need to unexport pin {pin}");
        Ok(())
    }

    fn set_direction(&self, pin: &str, direction: Direction) -> Result<(), AppError> {
        debug!(
            "pin direction not supported on gpio_sw, skipping {} for pin {pin}",
            direction.as_str()
        );
        Ok(())
    }

    fn set_edge(&self, pin: &str, edge: Edge) -> Result<(), AppError> {
        debug!(
            "pin edge not supported on gpio_sw, skipping {} for pin {pin}",
            edge.as_str()
        );
        Ok(())
    }

    fn read_value(&self, pin: &str) -> Result<String, AppError> {
        fs::read_to_string(self.data_path(pin)).map_err(|e| AppError::io("read", pin, e))
    }

    fn write_value(&self, pin: &str, raw: &str) -> Result<(), AppError> {
        fs::write(self.data_path(pin), raw).map_err(|e| AppError::io("write", pin, e))
    }

    fn watch(
        &self,
        channel: u32,
        pin: &str,
        handler: EventHandler,
    ) -> Result<Box<dyn PinWatch>, AppError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.data_path(pin))
            .map_err(|e| AppError::io("open", pin, e))?;

        // Arming read: without it the facility never fires.
        clear_interrupt(&file).map_err(|e| AppError::io("clear interrupt", pin, e))?;

        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| AppError::io("epoll create", pin, e.into()))?;
        epoll
            .add(&file, EpollEvent::new(EpollFlags::EPOLLPRI, 0))
            .map_err(|e| AppError::io("epoll register", pin, e.into()))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let pin_name = pin.to_string();

        let handle = thread::spawn(move || {
            let mut events = [EpollEvent::empty()];
            while !cancel_flag.load(Ordering::Relaxed) {
                let fired = match epoll.wait(
                    &mut events,
                    EpollTimeout::from(SYSFS_BACKEND_WAIT_TIMEOUT_MS),
                ) {
                    Ok(n) => n,
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        warn!("epoll wait error for pin {pin_name}: {e}");
                        thread::yield_now();
                        continue;
                    }
                };
                if fired == 0 {
                    continue;
                }

                // One dispatch per trigger, in facility order. A failed
                // re-read has no caller to report to and is only logged.
                match clear_interrupt(&file) {
                    Ok(Some(value)) => handler.dispatch(ChangeEvent {
                        channel,
                        value,
                        timestamp_ms: epoch_millis(),
                    }),
                    Ok(None) => warn!("empty value read after interrupt on pin {pin_name}"),
                    Err(e) => warn!("failed to re-read pin {pin_name} after interrupt: {e}"),
                }
            }
            // The thread owns the value handle; it closes here, exactly
            // once, after the poller can no longer fire.
        });

        debug!("watching pin {pin} for channel {channel}");
        Ok(Box::new(PinWatcher {
            cancel,
            handle: Some(handle),
        }))
    }
}
