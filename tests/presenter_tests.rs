use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;
use volumetric_player::config::{ImmersiveTarget, MotionPolicy, PlayerConfig, RenderMode};
use volumetric_player::frame::{FrameClock, FrameInfo};
use volumetric_player::haptics::VibrationDevice;
use volumetric_player::render::{Presenter, RenderStage};
use volumetric_player::service::simulated::CALL_LOG_CAPACITY;
use volumetric_player::service::{
    DecoderService, MediaKind, QualityProfile, ServiceCall, SimulatedService,
};
use volumetric_player::view_job::Viewport;
use volumetric_player::Player;

fn headless(config: PlayerConfig, service: SimulatedService) -> Player<SimulatedService> {
    let mut player = Player::new(config, service, None);
    player.initialize().unwrap();
    player.frame(&FrameInfo::new(0, 0.0, 0.016));
    assert!(player.session().is_initialized());
    player
}

fn run(player: &mut Player<SimulatedService>, frames: usize) {
    for info in FrameClock::fixed(60.0).take(frames) {
        player.frame(&info);
    }
}

#[test]
fn test_initialize_requires_output_size() {
    let config = PlayerConfig {
        window_width: 0,
        ..Default::default()
    };
    let mut player = Player::new(config, SimulatedService::with_media_count(1), None);
    assert!(player.initialize().is_err());
    assert!(player.service().calls().is_empty());
}

#[test]
fn test_video_binds_pre_render() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(0).unwrap();
    run(&mut player, 1);

    assert_eq!(player.dispatcher().bound_stage(), Some(RenderStage::PreRender));
    assert_eq!(player.dispatcher().owner(), Some(MediaKind::Video));
    assert!(player.presenters().video.is_active());
    assert_eq!(
        player.presenters().video.buffers().color().map(|c| (c.width, c.height)),
        Some((1920, 1080))
    );
    assert!(player
        .service()
        .calls()
        .contains(&ServiceCall::BindColor { width: 1920, height: 1080 }));
    assert_eq!(player.composites(), 1);
    assert_eq!(player.service().frames_rendered(), 1);
}

#[test]
fn test_point_cloud_binds_pre_cull() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(2).unwrap();
    run(&mut player, 3);

    assert_eq!(player.dispatcher().bound_stage(), Some(RenderStage::PreCull));
    assert_eq!(player.dispatcher().owner(), Some(MediaKind::PointCloud));
    assert_eq!(player.composites(), 3);

    let calls = player.service().calls();
    assert!(calls.contains(&ServiceCall::BindIndirectArgs));
    assert!(calls.contains(&ServiceCall::BindShadow { width: 512, height: 512 }));
    assert!(calls.contains(&ServiceCall::BindColor { width: 512, height: 256 }));
    assert!(calls.contains(&ServiceCall::BindPosition { width: 512, height: 256 }));
    assert!(calls.contains(&ServiceCall::SetVerticesPerPoint(1)));
    assert!(calls.contains(&ServiceCall::SetMaxBbox(1024.0)));

    // Settings are pushed every frame, the buffers only once
    let mvp_pushes = calls
        .iter()
        .filter(|c| **c == ServiceCall::SetModelViewProjection)
        .count();
    assert_eq!(mvp_pushes, 4);
    let position_binds = calls
        .iter()
        .filter(|c| matches!(c, ServiceCall::BindPosition { .. }))
        .count();
    assert_eq!(position_binds, 1);
}

#[test]
fn test_render_mode_changes_vertices_per_point() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(2).unwrap();
    run(&mut player, 1);

    player.set_render_mode(RenderMode::SortedBlend);
    player.service_mut().clear_calls();
    run(&mut player, 1);

    assert!(player.service().calls().contains(&ServiceCall::SetVerticesPerPoint(3)));
    assert_eq!(player.presenters().point_cloud.render_mode(), RenderMode::SortedBlend);
}

#[test]
fn test_point_buffers_grow_only() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(2).unwrap();
    run(&mut player, 1);

    player.service_mut().catalog_mut()[2].dimensions = (1024, 512);
    run(&mut player, 1);
    let color = player.presenters().point_cloud.buffers().color().unwrap();
    assert_eq!((color.width, color.height), (1024, 512));

    player.service_mut().catalog_mut()[2].dimensions = (256, 128);
    player.service_mut().clear_calls();
    run(&mut player, 1);
    let color = player.presenters().point_cloud.buffers().color().unwrap();
    assert_eq!((color.width, color.height), (1024, 512));
    assert!(!player
        .service()
        .calls()
        .iter()
        .any(|c| matches!(c, ServiceCall::BindColor { .. })));
}

#[test]
fn test_kind_switch_tears_down_previous_presenter() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(1).unwrap();
    run(&mut player, 1);
    assert!(player.presenters().immersive.is_active());
    assert_eq!(player.dispatcher().owner(), Some(MediaKind::MultiViewDepth));

    player.change_media(2).unwrap();
    run(&mut player, 1);

    assert!(!player.presenters().immersive.is_active());
    assert!(!player.presenters().immersive.buffers().is_allocated());
    assert!(player.presenters().point_cloud.is_active());
    assert_eq!(player.dispatcher().owner(), Some(MediaKind::PointCloud));
    assert_eq!(player.presenters_mut().active_kinds(), vec![MediaKind::PointCloud]);
}

#[test]
fn test_no_composite_while_switching() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(0).unwrap();
    run(&mut player, 2);
    assert_eq!(player.composites(), 2);

    player.service_mut().set_switch_latency(3);
    player.change_media(1).unwrap();
    assert!(!player.presenters().video.is_visible());

    run(&mut player, 3);
    assert_eq!(player.composites(), 2);
    assert_eq!(player.dispatcher().owner(), Some(MediaKind::Video));

    run(&mut player, 1);
    assert_eq!(player.composites(), 3);
    assert_eq!(player.dispatcher().owner(), Some(MediaKind::MultiViewDepth));
}

#[test]
fn test_fullscreen_immersive_restores_fov() {
    let config = PlayerConfig {
        reference_fov_deg: 90.0,
        ..Default::default()
    };
    let mut player = headless(config, SimulatedService::with_media_count(3));
    let base_fov = player.camera().fov_y;

    player.start(1).unwrap();
    run(&mut player, 1);
    let reference_fov = player.service().reference_camera().vertical_fov;
    assert!((player.camera().fov_y - reference_fov).abs() < 1e-6);

    player.change_media(2).unwrap();
    run(&mut player, 1);
    assert!((player.camera().fov_y - base_fov).abs() < 1e-6);
}

#[test]
fn test_stereo_jobs_side_by_side() {
    let mut config = PlayerConfig::default();
    config.immersive.view_count = 2;
    let mut player = headless(config, SimulatedService::with_media_count(3));
    player.start(1).unwrap();
    run(&mut player, 1);

    let jobs = player.presenters().immersive.jobs().jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].viewport, Viewport::new(1280, 720, 0, 0));
    assert_eq!(jobs[1].viewport, Viewport::new(1280, 720, 1280, 0));
    assert!(player.service().calls().contains(&ServiceCall::SetJobCount(2)));
    assert!(player
        .service()
        .calls()
        .contains(&ServiceCall::BindColor { width: 2560, height: 720 }));

    let separation = (jobs[1].extrinsics.translation - jobs[0].extrinsics.translation).length();
    assert!((separation - 0.064).abs() < 1e-5);
}

#[test]
fn test_window_target_keeps_camera_fov() {
    let mut config = PlayerConfig::default();
    config.immersive.target = ImmersiveTarget::Window;
    config.reference_fov_deg = 75.0;
    let mut player = headless(config, SimulatedService::with_media_count(3));
    let fov = player.camera().fov_y;

    player.start(1).unwrap();
    run(&mut player, 2);
    assert_eq!(player.camera().fov_y, fov);
    assert!(player.presenters().immersive.window().is_some());
}

#[test]
fn test_freeze_rolls_camera_back() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(1).unwrap();
    run(&mut player, 1);

    player.camera_mut().position = Vec3::new(0.5, 0.0, 0.0);
    run(&mut player, 1);
    assert_eq!(player.camera().position, Vec3::new(0.5, 0.0, 0.0));

    player.camera_mut().position = Vec3::new(5.0, 0.0, 0.0);
    run(&mut player, 1);
    assert_eq!(player.camera().position, Vec3::new(0.5, 0.0, 0.0));
}

#[test]
fn test_fade_out_follows_inclusion() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    assert_eq!(player.cycle_motion(), MotionPolicy::FadeOut);
    player.start(1).unwrap();
    run(&mut player, 1);
    assert_eq!(player.presenters().immersive.alpha(), 1.0);

    player.camera_mut().position = Vec3::new(1.5, 0.0, 0.0);
    run(&mut player, 2);
    assert!((player.presenters().immersive.alpha() - 0.5).abs() < 1e-5);
    assert_eq!(player.camera().position, Vec3::new(1.5, 0.0, 0.0));
}

#[test]
fn test_zero_content_size_retried_on_next_ready() {
    let mut service = SimulatedService::with_media_count(3);
    service.catalog_mut()[0].dimensions = (0, 0);
    let mut player = headless(PlayerConfig::default(), service);

    player.start(0).unwrap();
    run(&mut player, 2);
    assert_eq!(player.dispatcher().owner(), None);
    assert!(!player.presenters().video.is_active());
    assert_eq!(player.composites(), 0);
    assert!(player.session().is_media_ready());

    player.service_mut().catalog_mut()[0].dimensions = (1920, 1080);
    player.change_media(1).unwrap();
    run(&mut player, 1);
    player.change_media(0).unwrap();
    run(&mut player, 1);

    assert_eq!(player.dispatcher().owner(), Some(MediaKind::Video));
    assert!(player.presenters().video.is_active());
}

#[test]
fn test_auto_start_waits_for_ready() {
    let config = PlayerConfig {
        auto_start: true,
        start_media_id: 2,
        ..Default::default()
    };
    let service = SimulatedService::with_media_count(3).init_latency(2);
    let mut player = Player::new(config, service, None);
    player.initialize().unwrap();

    run(&mut player, 2);
    assert!(!player.session().is_started());

    run(&mut player, 1);
    assert_eq!(player.session().current_media_id(), 2);
    assert_eq!(player.dispatcher().owner(), Some(MediaKind::PointCloud));
}

#[test]
fn test_next_media_wraps() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));

    let mut seen = Vec::new();
    for _ in 0..4 {
        player.next_media().unwrap();
        run(&mut player, 1);
        seen.push(player.session().current_media_id());
    }
    assert_eq!(seen, vec![0, 1, 2, 0]);
}

#[test]
fn test_stop_hides_and_blocks_composite() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(0).unwrap();
    run(&mut player, 1);

    player.stop();
    run(&mut player, 3);
    assert_eq!(player.composites(), 1);
    assert!(!player.presenters().video.is_visible());
}

#[test]
fn test_shutdown_releases_everything() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(2).unwrap();
    run(&mut player, 1);
    player.service_mut().clear_calls();

    player.shutdown();
    assert!(player.presenters_mut().active_kinds().is_empty());
    assert!(!player.presenters().point_cloud.buffers().is_allocated());
    assert_eq!(player.dispatcher().owner(), None);
    assert_eq!(player.service().lifecycle_calls(), vec![ServiceCall::Stop, ServiceCall::Destroy]);
    assert!(!player.session().is_initialized());
}

#[test]
fn test_session_events_reach_subscribers() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    player.events_mut().subscribe(move |event| sink.borrow_mut().push(event.clone()));

    player.start(0).unwrap();
    run(&mut player, 1);
    player.toggle_play_pause();

    assert_eq!(seen.borrow().len(), 5);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motor {
    Vibrate(u32, u8),
    Cancel,
}

struct RecordingDevice(Rc<RefCell<Vec<Motor>>>);

impl VibrationDevice for RecordingDevice {
    fn vibrate(&mut self, duration_ms: u32, amplitude: u8) {
        self.0.borrow_mut().push(Motor::Vibrate(duration_ms, amplitude));
    }

    fn cancel(&mut self) {
        self.0.borrow_mut().push(Motor::Cancel);
    }
}

#[test]
fn test_haptics_bound_on_init_and_ramped() {
    let motor = Rc::new(RefCell::new(Vec::new()));
    let mut player = Player::with_vibration(
        PlayerConfig::default(),
        SimulatedService::with_media_count(3),
        None,
        Box::new(RecordingDevice(motor.clone())),
    );
    player.initialize().unwrap();
    assert!(!player.service().has_haptic_callback());

    player.frame(&FrameInfo::new(0, 0.0, 0.1));
    assert!(player.haptics_mut().is_bound());
    assert!(player.service().has_haptic_callback());

    player
        .service()
        .trigger_haptic(0, 400, 0.0, 1.0)
        .unwrap()
        .join()
        .unwrap();
    player.frame(&FrameInfo::new(1, 0.1, 0.1));
    assert_eq!(*motor.borrow(), vec![Motor::Cancel, Motor::Vibrate(400, 1)]);
    assert!(player.haptics_mut().is_playing());

    player.frame(&FrameInfo::new(2, 0.2, 0.1));
    match motor.borrow().last() {
        Some(Motor::Vibrate(remaining, amplitude)) => {
            assert!(*remaining < 400);
            assert!(*amplitude > 1 && *amplitude < 255);
        }
        other => panic!("unexpected motor state {:?}", other),
    }

    for number in 3..10 {
        player.frame(&FrameInfo::new(number, number as f32 * 0.1, 0.1));
    }
    assert!(!player.haptics_mut().is_playing());
    assert_eq!(motor.borrow().last(), Some(&Motor::Cancel));
}

#[test]
fn test_long_playback_keeps_call_log_bounded() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(3));
    player.start(2).unwrap();
    run(&mut player, 10_000);

    assert_eq!(player.composites(), 10_000);
    assert!(player.service().calls().len() <= CALL_LOG_CAPACITY);
    assert_eq!(player.service().calls().last(), Some(&ServiceCall::Render));
}

#[test]
fn test_quality_profile_pushed_on_init() {
    let config = PlayerConfig {
        quality: QualityProfile::High,
        ..Default::default()
    };
    let player = headless(config, SimulatedService::with_media_count(1));
    assert!(player
        .service()
        .calls()
        .contains(&ServiceCall::SetQualityProfile(QualityProfile::High)));

    let player = headless(PlayerConfig::default(), SimulatedService::with_media_count(1));
    assert!(!player
        .service()
        .calls()
        .iter()
        .any(|c| matches!(c, ServiceCall::SetQualityProfile(_))));
}

#[test]
fn test_decoder_fps_follows_playback() {
    let mut player = headless(PlayerConfig::default(), SimulatedService::with_media_count(2));
    assert_eq!(player.decoder_fps(), 0.0);

    player.start(0).unwrap();
    run(&mut player, 2);
    assert!(player.decoder_fps() > 0.0);

    player.pause(true);
    assert_eq!(player.decoder_fps(), 0.0);
}
