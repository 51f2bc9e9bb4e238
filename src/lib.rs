pub mod camera;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod frame;
pub mod haptics;
pub mod player;
pub mod render;
pub mod service;
pub mod session;
pub mod sort;
pub mod view_job;

pub use config::PlayerConfig;
pub use error::{PlayerError, Result};
pub use player::Player;
pub use service::{DecoderService, SimulatedService};
pub use session::{MediaSession, SessionEvent};
