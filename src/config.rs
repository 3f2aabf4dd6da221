use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    #[serde(default = "default_base_path")]
    pub path: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            unix_socket: None,
            host: Some("127.0.0.1:7070".to_string()),
            path: default_base_path(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PinMode {
    Opi,
    Bcm,
}

impl Default for PinMode {
    fn default() -> Self {
        PinMode::Opi
    }
}

impl PinMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PinMode::Opi => "opi",
            PinMode::Bcm => "bcm",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "opi" => Ok(PinMode::Opi),
            "bcm" => Ok(PinMode::Bcm),
            other => Err(AppError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    In,
    Out,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Out
    }
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(AppError::InvalidDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Default for Edge {
    fn default() -> Self {
        Edge::None
    }
}

impl Edge {
    pub fn as_str(self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "none" => Ok(Edge::None),
            "rising" => Ok(Edge::Rising),
            "falling" => Ok(Edge::Falling),
            "both" => Ok(Edge::Both),
            other => Err(AppError::InvalidEdge(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mode: PinMode,
    #[serde(default = "default_gpio_path")]
    pub gpio_path: PathBuf,
    #[serde(default = "default_cpuinfo_path")]
    pub cpuinfo_path: PathBuf,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_event_history_capacity")]
    pub event_history_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            mode: PinMode::default(),
            gpio_path: default_gpio_path(),
            cpuinfo_path: default_cpuinfo_path(),
            broadcast_capacity: default_broadcast_capacity(),
            event_history_capacity: default_event_history_capacity(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}

fn default_base_path() -> String {
    "/api/v1".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_gpio_path() -> PathBuf {
    PathBuf::from("/sys/class/gpio_sw")
}

fn default_cpuinfo_path() -> PathBuf {
    PathBuf::from("/proc/cpuinfo")
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_event_history_capacity() -> usize {
    32
}
