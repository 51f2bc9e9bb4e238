use crate::service::MediaKind;

/// Camera pipeline points at which the service's composite call can be issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStage {
    /// Before the scene is culled; point clouds queue their sort and indirect draw here
    PreCull,
    /// Before the camera draws; plain and immersive video only need a fresh texture
    PreRender,
    /// After the main pass, for overlay composition
    PostRender,
}

impl RenderStage {
    /// Order in which the stages occur within one frame
    pub const ORDER: [RenderStage; 3] = [Self::PreCull, Self::PreRender, Self::PostRender];
}

/// Which stage (if any) currently fires the composite call, and on whose behalf.
///
/// Only one presenter is ever armed: arming for a new kind replaces the previous owner.
#[derive(Debug, Clone, Default)]
pub struct StageDispatcher {
    binding: Option<(RenderStage, MediaKind)>,
}

impl StageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, stage: RenderStage, owner: MediaKind) {
        if let Some((previous_stage, previous_owner)) = self.binding {
            if previous_owner != owner {
                log::debug!(
                    "Stage binding moves from {:?}@{:?} to {:?}@{:?}",
                    previous_owner,
                    previous_stage,
                    owner,
                    stage
                );
            }
        }
        self.binding = Some((stage, owner));
    }

    /// Detach the binding; returns the previous owner
    pub fn disarm(&mut self) -> Option<MediaKind> {
        self.binding.take().map(|(_, owner)| owner)
    }

    pub fn bound_stage(&self) -> Option<RenderStage> {
        self.binding.map(|(stage, _)| stage)
    }

    pub fn owner(&self) -> Option<MediaKind> {
        self.binding.map(|(_, owner)| owner)
    }

    /// True when `stage` is the bound one and the session allows rendering
    pub fn fires_at(&self, stage: RenderStage, can_render: bool) -> bool {
        can_render && self.bound_stage() == Some(stage)
    }
}

/// Three stage notifications invoked by the windowing/graphics layer, in `RenderStage::ORDER`
pub trait CameraStageHooks {
    type Frame<'f>;

    fn pre_cull(&mut self, frame: &mut Self::Frame<'_>);
    fn pre_render(&mut self, frame: &mut Self::Frame<'_>);
    fn post_render(&mut self, frame: &mut Self::Frame<'_>);

    fn run_stage(&mut self, stage: RenderStage, frame: &mut Self::Frame<'_>) {
        match stage {
            RenderStage::PreCull => self.pre_cull(frame),
            RenderStage::PreRender => self.pre_render(frame),
            RenderStage::PostRender => self.post_render(frame),
        }
    }

    fn run_all_stages(&mut self, frame: &mut Self::Frame<'_>) {
        for stage in RenderStage::ORDER {
            self.run_stage(stage, frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_owner() {
        let mut dispatcher = StageDispatcher::new();
        dispatcher.arm(RenderStage::PreRender, MediaKind::Video);
        dispatcher.arm(RenderStage::PreCull, MediaKind::PointCloud);

        assert_eq!(dispatcher.owner(), Some(MediaKind::PointCloud));
        assert_eq!(dispatcher.bound_stage(), Some(RenderStage::PreCull));
        assert_eq!(dispatcher.disarm(), Some(MediaKind::PointCloud));
        assert_eq!(dispatcher.bound_stage(), None);
    }

    #[test]
    fn test_fires_only_at_bound_stage() {
        let mut dispatcher = StageDispatcher::new();
        assert!(!dispatcher.fires_at(RenderStage::PreCull, true));

        dispatcher.arm(RenderStage::PreCull, MediaKind::PointCloud);
        assert!(dispatcher.fires_at(RenderStage::PreCull, true));
        assert!(!dispatcher.fires_at(RenderStage::PreCull, false));
        assert!(!dispatcher.fires_at(RenderStage::PreRender, true));
    }

    struct Recorder;

    impl CameraStageHooks for Recorder {
        type Frame<'f> = Vec<RenderStage>;

        fn pre_cull(&mut self, frame: &mut Vec<RenderStage>) {
            frame.push(RenderStage::PreCull);
        }
        fn pre_render(&mut self, frame: &mut Vec<RenderStage>) {
            frame.push(RenderStage::PreRender);
        }
        fn post_render(&mut self, frame: &mut Vec<RenderStage>) {
            frame.push(RenderStage::PostRender);
        }
    }

    #[test]
    fn test_stages_in_frame_order() {
        let mut frame = Vec::new();
        Recorder.run_all_stages(&mut frame);
        assert_eq!(frame, RenderStage::ORDER.to_vec());
    }
}
