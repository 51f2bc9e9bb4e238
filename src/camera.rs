use glam::{Mat4, Quat, Vec3};

pub const DEFAULT_FOV_Y_DEG: f32 = 60.0;
pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 1000.0;

/// Virtual (or tracked) camera rendering the scene
///
/// Right-handed, looking down -Z in its local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Camera {
    pub fn new(pixel_width: u32, pixel_height: u32) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            fov_y: DEFAULT_FOV_Y_DEG.to_radians(),
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
            pixel_width,
            pixel_height,
        }
    }

    pub fn with_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn aspect(&self) -> f32 {
        self.pixel_width.max(1) as f32 / self.pixel_height.max(1) as f32
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn resize(&mut self, pixel_width: u32, pixel_height: u32) {
        self.pixel_width = pixel_width;
        self.pixel_height = pixel_height;
    }

    /// Camera-to-world transform
    pub fn pose(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    pub fn view(&self) -> Mat4 {
        self.pose().inverse()
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect(), self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Eye position for eye `eye` of `eye_count`, spread along the camera's right axis
    pub fn eye_position(&self, eye: u32, eye_count: u32, separation: f32) -> Vec3 {
        if eye_count < 2 {
            return self.position;
        }
        let offset = (eye as f32 / (eye_count - 1) as f32 - 0.5) * separation;
        self.position + self.right() * offset
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// Placement of an on-screen target (quad, sphere, point-cloud anchor) in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl TargetTransform {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn local_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn world_to_local(&self) -> Mat4 {
        self.local_to_world().inverse()
    }

    /// World-to-local transform with the scale neutralised, so distances measured in it
    /// stay metric however the target has been resized
    pub fn world_to_local_unscaled(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position).inverse()
    }
}

impl Default for TargetTransform {
    fn default() -> Self {
        Self::new(Vec3::ZERO)
    }
}
