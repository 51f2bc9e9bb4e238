pub mod gpu_context;
pub mod surface_renderer;
pub mod timer;

pub use gpu_context::GpuContext;
pub use surface_renderer::SurfaceRenderer;
pub use timer::{Countdown, EveryNTicks};
