use thiserror::Error;

/// Errors raised by the player itself (as opposed to errors reported by the decoding service)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlayerError {
    #[error("no camera/output target bound, aborting initialisation")]
    NoOutputTarget,
    #[error("session is not initialised")]
    NotInitialized,
    #[error("invalid media id {requested}, available media: {available}")]
    InvalidMediaId { requested: i32, available: u32 },
    #[error("media {0} is already the current media")]
    SameMedia(i32),
    #[error("decoder reported zero-sized content")]
    ZeroContentSize,
    #[error("gpu error: {0}")]
    Gpu(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

/// Severity attached to errors reported by the decoding service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorLevel {
    Info,
    Warning,
    Error,
}

impl ErrorLevel {
    /// Decode the raw level delivered through the error callback.
    /// Unknown levels are treated as errors.
    pub fn from_raw(level: u32) -> Self {
        match level {
            0 => Self::Info,
            1 => Self::Warning,
            _ => Self::Error,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }

    /// How long a notification for this level should stay on screen
    pub fn display_seconds(&self) -> f32 {
        match self {
            Self::Info | Self::Warning => 4.0,
            Self::Error => 7.0,
        }
    }
}

/// Error reported asynchronously by the decoding service.
/// The meaning of `code` is owned by the service; `describe` covers the known table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceError {
    pub level: ErrorLevel,
    pub code: u32,
}

impl ServiceError {
    pub fn new(level: ErrorLevel, code: u32) -> Self {
        Self { level, code }
    }

    pub fn from_raw(level: u32, code: u32) -> Self {
        Self::new(ErrorLevel::from_raw(level), code)
    }

    pub fn describe(&self) -> &'static str {
        match self.code {
            // Streaming client
            0 => "No error",
            1 => "Initialisation failed",
            2 => "The init segment is empty",
            3 => "Can not access to the MPD file",
            4 => "Parsing MPD file failed",
            5 => "MPD file not found",
            6 => "CURL connection error",
            7 => "HTTP error",
            8 => "Streamer error",
            9 => "Extraction error",
            10 => "HJIF error",
            11 => "HJIF file not found",
            12 => "Access to HJIF file failed",
            13 => "Config file for haptic not found",
            14 => "No haptic",
            15 => "Init segment not found",
            16 => "Segment not found",
            17 => "Access to segment failed",
            // Local files
            100 => "No error",
            101 => "Invalid stream file",
            // Decoder
            200 => "No decoder error",
            201 => "AVCODEC file undefined",
            _ => "Unknown error",
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} (code {})", self.level.title(), self.describe(), self.code)
    }
}
