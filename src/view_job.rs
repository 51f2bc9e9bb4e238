use glam::{Quat, Vec3};

use crate::service::{DecoderService, ProjectionKind};

/// Focal length used for the safe defaults pushed right after initialisation
pub const DEFAULT_FOCAL: f32 = 60.0;
/// Principal point used for the safe defaults (centre of a 1720x1080 sensor)
pub const DEFAULT_PRINCIPAL_POINT: (f32, f32) = (860.0, 540.0);

/// Pixel rectangle a job renders into, measured from the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32, x: u32, y: u32) -> Self {
        Self { width, height, x, y }
    }

    /// Full-size viewport anchored at the origin
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(width, height, 0, 0)
    }
}

/// Pinhole intrinsics in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Square-pixel intrinsics centred on a `width` x `height` image
    pub fn from_vertical_fov(fov_y: f32, width: u32, height: u32) -> Self {
        let focal = focal_length_from_fov(fov_y, height as f32);
        Self::new(focal, focal, width as f32 * 0.5, height as f32 * 0.5)
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::new(
            DEFAULT_FOCAL,
            DEFAULT_FOCAL,
            DEFAULT_PRINCIPAL_POINT.0,
            DEFAULT_PRINCIPAL_POINT.1,
        )
    }
}

/// Camera pose: translation plus rotation quaternion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Extrinsics {
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self { translation, rotation }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quat::IDENTITY)
    }

    /// Flattened `(tx, ty, tz, qx, qy, qz, qw)` as sent over the service boundary
    pub fn to_array(&self) -> [f32; 7] {
        [
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.rotation.w,
        ]
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Quat::IDENTITY)
    }
}

/// Per-view camera configuration sent to the decoding service every frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewJob {
    pub index: u32,
    pub viewport: Viewport,
    pub resolution: (u32, u32),
    pub projection: ProjectionKind,
    pub intrinsics: Intrinsics,
    pub extrinsics: Extrinsics,
}

impl ViewJob {
    pub fn new(index: u32, width: u32, height: u32, projection: ProjectionKind) -> Self {
        Self {
            index,
            viewport: Viewport::full(width, height),
            resolution: (width, height),
            projection,
            intrinsics: Intrinsics::default(),
            extrinsics: Extrinsics::default(),
        }
    }

    /// Side-by-side layout: job `index` occupies the `index`-th `width`-wide column
    pub fn side_by_side(index: u32, width: u32, height: u32, projection: ProjectionKind) -> Self {
        Self {
            viewport: Viewport::new(width, height, width * index, 0),
            ..Self::new(index, width, height, projection)
        }
    }

    /// Push the static part of the job (viewport, projection, resolution)
    pub fn configure(&self, service: &mut dyn DecoderService) {
        service.set_viewport(self.index, self.viewport);
        service.set_projection(self.index, self.projection);
        service.set_resolution(self.index, self.resolution.0, self.resolution.1);
    }

    /// Push the per-frame part of the job (intrinsics, extrinsics)
    pub fn update_pose(&self, service: &mut dyn DecoderService) {
        service.set_intrinsics(self.index, self.intrinsics);
        service.set_extrinsics(self.index, self.extrinsics);
    }
}

/// Ordered set of jobs owned by one presenter
#[derive(Debug, Clone, Default)]
pub struct ViewJobSet {
    jobs: Vec<ViewJob>,
}

impl ViewJobSet {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn single(job: ViewJob) -> Self {
        Self { jobs: vec![job] }
    }

    /// `count` side-by-side views of `width` x `height` each
    pub fn side_by_side(count: u32, width: u32, height: u32, projection: ProjectionKind) -> Self {
        Self {
            jobs: (0..count)
                .map(|i| ViewJob::side_by_side(i, width, height, projection))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[ViewJob] {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut [ViewJob] {
        &mut self.jobs
    }

    /// Announce the job count and push every job's static configuration
    pub fn configure(&self, service: &mut dyn DecoderService) {
        service.set_job_count(self.jobs.len() as u32);
        for job in &self.jobs {
            job.configure(service);
        }
    }

    pub fn update_poses(&self, service: &mut dyn DecoderService) {
        for job in &self.jobs {
            job.update_pose(service);
        }
    }
}

/// Safe parameters pushed once the service reports ready, so the renderer never
/// runs on undefined job state
pub fn push_default_jobs(service: &mut dyn DecoderService) {
    service.set_job_count(1);
    service.set_intrinsics(0, Intrinsics::default());
    service.set_extrinsics(0, Extrinsics::default());
}

/// Focal length in pixels for a vertical field of view (radians) over `sensor_height` pixels
pub fn focal_length_from_fov(fov_y: f32, sensor_height: f32) -> f32 {
    sensor_height * 0.5 / (fov_y * 0.5).tan()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focal_from_fov() {
        // 90 degrees: tan(45) = 1, focal = half the height
        let focal = focal_length_from_fov(std::f32::consts::FRAC_PI_2, 1080.0);
        assert!((focal - 540.0).abs() < 1e-3);
    }

    #[test]
    fn test_intrinsics_from_fov_centred() {
        let k = Intrinsics::from_vertical_fov(std::f32::consts::FRAC_PI_2, 1920, 1080);
        assert_eq!(k.cx, 960.0);
        assert_eq!(k.cy, 540.0);
        assert_eq!(k.fx, k.fy);
    }

    #[test]
    fn test_side_by_side_viewports() {
        let set = ViewJobSet::side_by_side(2, 1280, 720, ProjectionKind::Perspective);
        assert_eq!(set.len(), 2);
        assert_eq!(set.jobs()[0].viewport, Viewport::new(1280, 720, 0, 0));
        assert_eq!(set.jobs()[1].viewport, Viewport::new(1280, 720, 1280, 0));
        assert_eq!(set.jobs()[1].index, 1);
    }

    #[test]
    fn test_extrinsics_layout() {
        let e = Extrinsics::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(e.to_array(), [1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0]);
    }
}
