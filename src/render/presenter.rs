use crate::error::Result;
use crate::service::MediaKind;
use crate::session::RenderData;

use super::stage::RenderStage;
use super::{FrameEncoder, PresenterContext};

/// Per-kind consumer of the service's frame buffers.
///
/// Lifecycle contract, driven by the session events:
/// - `on_media_request`: hide current visuals, a different media is coming
/// - `on_pre_media_ready`: tear down if active and the incoming kind is not ours
/// - `on_media_ready`: if the kind is ours, allocate and bind buffers, configure view jobs
///   and become active
/// - `on_post_media_ready`: fix-ups once every presenter has reacted
///
/// While armed, `before_composite` runs right before the service's composite call at the
/// bound stage and `after_composite` right after it.
pub trait Presenter {
    fn kind(&self) -> MediaKind;

    /// Stage this presenter binds the composite call to
    fn stage(&self) -> RenderStage;

    fn is_active(&self) -> bool;

    fn is_visible(&self) -> bool;

    fn on_media_request(&mut self, ctx: &mut PresenterContext<'_>);

    fn on_pre_media_ready(&mut self, data: &RenderData, ctx: &mut PresenterContext<'_>) {
        if self.is_active() && data.media_kind != self.kind() {
            log::info!("{:?} presenter torn down for {:?} media", self.kind(), data.media_kind);
            self.teardown(ctx);
        }
    }

    /// Returns `Ok(true)` when the presenter activated and wants the stage binding
    fn on_media_ready(&mut self, data: &RenderData, ctx: &mut PresenterContext<'_>) -> Result<bool>;

    fn on_post_media_ready(&mut self, _data: &RenderData, _ctx: &mut PresenterContext<'_>) {}

    fn on_pause(&mut self, _paused: bool) {}

    /// Per-frame view update, before the composite call
    fn before_composite(
        &mut self,
        ctx: &mut PresenterContext<'_>,
        frame: Option<&mut FrameEncoder<'_>>,
    );

    /// Per-frame draw, after the composite call
    fn after_composite(
        &mut self,
        ctx: &mut PresenterContext<'_>,
        frame: Option<&mut FrameEncoder<'_>>,
    );

    /// Restore mutated camera state, release owned buffers and go inactive
    fn teardown(&mut self, ctx: &mut PresenterContext<'_>);
}
