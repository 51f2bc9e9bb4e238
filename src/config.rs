use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, Result};
use crate::service::QualityProfile;
use crate::sort::DEFAULT_SORT_RANGE;

/// Where the video presenter shows its frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoTarget {
    Fullscreen,
    Quad,
    Sphere,
}

/// Where the multi-view presenter shows its synthesized views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmersiveTarget {
    Fullscreen,
    Window,
}

/// What happens when the camera leaves the content's viewing space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPolicy {
    /// Roll the camera back to the last position inside the viewing space
    Freeze,
    /// Fade the view out with the inclusion ratio
    FadeOut,
    /// No restriction
    Free,
}

impl MotionPolicy {
    /// Freeze -> FadeOut -> Free -> Freeze
    pub fn next(self) -> Self {
        match self {
            Self::Freeze => Self::FadeOut,
            Self::FadeOut => Self::Free,
            Self::Free => Self::Freeze,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// One vertex per point, point-list topology, unsorted
    Points,
    /// Three vertices per point, gaussian splats, depth sorted and alpha blended
    SortedBlend,
}

impl RenderMode {
    pub fn vertices_per_point(self) -> u32 {
        match self {
            Self::Points => 1,
            Self::SortedBlend => 3,
        }
    }

    pub fn uses_sort(self) -> bool {
        matches!(self, Self::SortedBlend)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decimation {
    None,
    Two,
    Four,
}

impl Decimation {
    pub fn level(self) -> u32 {
        match self {
            Self::None => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub target: VideoTarget,
    /// Show 360° media on the sphere regardless of `target`
    pub immersive_360: bool,
    pub aspect_ratio: f32,
    /// Quad height in world units, its width follows `aspect_ratio`
    pub quad_height: f32,
    pub quad_distance: f32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            target: VideoTarget::Fullscreen,
            immersive_360: false,
            aspect_ratio: 16.0 / 9.0,
            quad_height: 1.0,
            quad_distance: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmersiveConfig {
    pub target: ImmersiveTarget,
    /// 1 for mono, 2 for stereo
    pub view_count: u32,
    pub eye_separation: f32,
    pub motion: MotionPolicy,
}

impl Default for ImmersiveConfig {
    fn default() -> Self {
        Self {
            target: ImmersiveTarget::Fullscreen,
            view_count: 1,
            eye_separation: 0.064,
            motion: MotionPolicy::Freeze,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudConfig {
    pub render_mode: RenderMode,
    /// Number of depth buckets of the sort
    pub sort_range: u32,
    pub point_size: f32,
    pub sorted_point_size: f32,
    /// Inverse variance of the splat's gaussian alpha
    pub alpha_falloff: f32,
    pub show_shadow: bool,
    pub shadow_resolution: u32,
    pub decimation: Decimation,
    pub max_bbox: f32,
    pub dynamic_decimation: bool,
    pub decimation_r1: f32,
    pub decimation_r2: f32,
    pub viewport_cull_threshold: f32,
    /// Model placement in front of the camera
    pub model_distance: f32,
    pub model_scale: f32,
}

impl Default for PointCloudConfig {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::Points,
            sort_range: DEFAULT_SORT_RANGE,
            point_size: 2.0,
            sorted_point_size: 2.0,
            alpha_falloff: 8.0,
            show_shadow: true,
            shadow_resolution: 512,
            decimation: Decimation::None,
            max_bbox: 1024.0,
            dynamic_decimation: false,
            decimation_r1: 15.0,
            decimation_r2: 30.0,
            viewport_cull_threshold: 0.0,
            model_distance: 3.0,
            model_scale: 1.0,
        }
    }
}

/// Player settings, loaded from a JSON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Decoder configuration file name, passed opaquely to the service
    pub decoder_config_file: String,
    /// Application-private directory the decoder configuration is resolved against
    pub storage_dir: PathBuf,
    pub start_media_id: i32,
    pub auto_start: bool,
    pub reference_fov_deg: f32,
    pub quality: QualityProfile,
    pub window_width: u32,
    pub window_height: u32,
    pub video: VideoConfig,
    pub immersive: ImmersiveConfig,
    pub point_cloud: PointCloudConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            decoder_config_file: "config.json".to_string(),
            storage_dir: PathBuf::from("."),
            start_media_id: 0,
            auto_start: false,
            reference_fov_deg: 60.0,
            quality: QualityProfile::None,
            window_width: 1280,
            window_height: 720,
            video: VideoConfig::default(),
            immersive: ImmersiveConfig::default(),
            point_cloud: PointCloudConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| PlayerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.immersive.view_count) {
            return Err(PlayerError::Config(format!(
                "immersive.view_count must be 1 or 2, got {}",
                self.immersive.view_count
            )));
        }
        if self.point_cloud.sort_range == 0 {
            return Err(PlayerError::Config("point_cloud.sort_range must be positive".into()));
        }
        if self.point_cloud.max_bbox <= 0.0 {
            return Err(PlayerError::Config("point_cloud.max_bbox must be positive".into()));
        }
        Ok(())
    }

    /// Resolved decoder configuration path handed to `create` and to init observers
    pub fn decoder_config_path(&self) -> PathBuf {
        self.storage_dir.join(&self.decoder_config_file)
    }
}
