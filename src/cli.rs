// cli.rs - Command-line interface configuration
use std::path::PathBuf;

use clap::Parser;

use crate::config::{PlayerConfig, RenderMode};
use crate::error::Result;

#[derive(Parser, Debug, Clone)]
#[command(name = "volumetric-player")]
#[command(about = "Volumetric media player", long_about = None)]
pub struct Cli {
    /// Player settings (JSON); defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Media to start with
    #[arg(long)]
    pub media: Option<i32>,

    /// Start playback as soon as the decoder is ready
    #[arg(long = "auto-start", default_value = "false")]
    pub auto_start: bool,

    #[arg(long = "render-mode", value_enum)]
    pub render_mode: Option<RenderMode>,

    /// Number of depth buckets used by the point sort
    #[arg(long = "sort-range")]
    pub sort_range: Option<u32>,

    /// Run the frame loop without a window
    #[arg(long, default_value = "false")]
    pub headless: bool,

    /// Frames to run in headless mode
    #[arg(long, default_value_t = 600)]
    pub frames: u64,

    /// Size of the simulated media catalog
    #[arg(long = "media-count", default_value_t = 3)]
    pub media_count: u32,
}

impl Cli {
    /// Load the player config and apply the command-line overrides
    pub fn player_config(&self) -> Result<PlayerConfig> {
        let mut config = match &self.config {
            Some(path) => PlayerConfig::load(path)?,
            None => PlayerConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut PlayerConfig) {
        if let Some(media) = self.media {
            config.start_media_id = media;
        }
        if self.auto_start || self.headless {
            config.auto_start = true;
        }
        if let Some(mode) = self.render_mode {
            config.point_cloud.render_mode = mode;
        }
        if let Some(range) = self.sort_range {
            config.point_cloud.sort_range = range;
        }
    }
}
