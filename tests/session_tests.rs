use std::path::PathBuf;

use volumetric_player::error::{ErrorLevel, PlayerError};
use volumetric_player::service::{MediaKind, ServiceCall, SimulatedService};
use volumetric_player::session::{
    InitState, MediaSession, RenderData, SessionEvent, INVALID_MEDIA_ID,
};

fn ready(service: &mut SimulatedService) -> (MediaSession, Vec<SessionEvent>) {
    let mut session = MediaSession::new();
    let mut events = Vec::new();
    session
        .initialize(service, PathBuf::from("config.json"), true)
        .unwrap();
    session.tick(service, &mut events);
    assert!(session.is_initialized());
    events.clear();
    (session, events)
}

fn ready_events(events: &[SessionEvent]) -> Vec<&SessionEvent> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                SessionEvent::PreMediaReady(_)
                    | SessionEvent::MediaReady(_)
                    | SessionEvent::PostMediaReady(_)
            )
        })
        .collect()
}

#[test]
fn test_out_of_range_start_is_rejected() {
    let mut service = SimulatedService::with_media_count(3);
    let (mut session, mut events) = ready(&mut service);
    service.clear_calls();

    for id in [-1, 3, 42, INVALID_MEDIA_ID] {
        let result = session.start(&mut service, id);
        assert_eq!(
            result,
            Err(PlayerError::InvalidMediaId {
                requested: id,
                available: 3
            })
        );
        let result = session.change_media(&mut service, &mut events, id);
        assert!(result.is_err());
    }

    assert!(!session.is_started());
    assert_eq!(session.current_media_id(), INVALID_MEDIA_ID);
    assert!(service.lifecycle_calls().is_empty());
    assert!(events.is_empty());
}

#[test]
fn test_out_of_range_change_while_playing() {
    let mut service = SimulatedService::with_media_count(3);
    let (mut session, mut events) = ready(&mut service);
    session.start(&mut service, 0).unwrap();
    session.tick(&mut service, &mut events);
    service.clear_calls();
    events.clear();

    assert!(session.change_media(&mut service, &mut events, 3).is_err());
    assert_eq!(session.current_media_id(), 0);
    assert_eq!(session.requested_media_id(), 0);
    assert!(session.is_started());
    assert!(service.lifecycle_calls().is_empty());
    assert!(events.is_empty());
}

#[test]
fn test_same_media_is_rejected() {
    let mut service = SimulatedService::with_media_count(3);
    let (mut session, mut events) = ready(&mut service);
    session.start(&mut service, 1).unwrap();
    session.tick(&mut service, &mut events);
    service.clear_calls();
    events.clear();

    assert_eq!(
        session.change_media(&mut service, &mut events, 1),
        Err(PlayerError::SameMedia(1))
    );
    assert!(service.calls().is_empty());
    assert!(events.is_empty());
}

#[test]
fn test_ready_events_fire_once_in_order() {
    let mut service = SimulatedService::with_media_count(3).switch_latency(2);
    let (mut session, mut events) = ready(&mut service);

    session.start(&mut service, 2).unwrap();
    for _ in 0..6 {
        session.tick(&mut service, &mut events);
    }

    let data = RenderData {
        media_id: 2,
        media_kind: MediaKind::PointCloud,
        media_name: "media_2".to_string(),
    };
    assert_eq!(
        events,
        vec![
            SessionEvent::PreMediaReady(data.clone()),
            SessionEvent::MediaReady(data.clone()),
            SessionEvent::PostMediaReady(data),
            SessionEvent::Pause(false),
        ]
    );
    assert!(!session.is_paused());
    assert!(session.is_media_ready());
    assert!(session.can_render());
}

#[test]
fn test_ready_unpauses() {
    let mut service = SimulatedService::with_media_count(3).switch_latency(1);
    let (mut session, mut events) = ready(&mut service);
    session.start(&mut service, 0).unwrap();
    session.tick(&mut service, &mut events);
    session.tick(&mut service, &mut events);
    session.pause(&mut service, &mut events, true);
    assert!(session.is_paused());

    session.change_media(&mut service, &mut events, 1).unwrap();
    session.tick(&mut service, &mut events);
    assert!(session.is_paused());
    session.tick(&mut service, &mut events);

    assert_eq!(session.current_media_id(), 1);
    assert!(!session.is_paused());
    assert!(!service.is_paused());
}

#[test]
fn test_newer_request_supersedes_pending_one() {
    let mut service = SimulatedService::with_media_count(3).switch_latency(5);
    let (mut session, mut events) = ready(&mut service);
    session.start(&mut service, 0).unwrap();
    for _ in 0..7 {
        session.tick(&mut service, &mut events);
    }
    assert_eq!(session.current_media_id(), 0);
    events.clear();

    // A is requested but never completes before B replaces it
    session.change_media(&mut service, &mut events, 1).unwrap();
    session.tick(&mut service, &mut events);
    session.change_media(&mut service, &mut events, 2).unwrap();

    // The service now reports the stale request A
    service.force_reported_id(1);
    session.tick(&mut service, &mut events);
    session.tick(&mut service, &mut events);
    assert!(ready_events(&events).is_empty());
    assert_eq!(session.current_media_id(), 0);
    assert!(!session.is_media_ready());

    service.force_reported_id(2);
    session.tick(&mut service, &mut events);

    let ready = ready_events(&events);
    assert_eq!(ready.len(), 3);
    assert!(matches!(ready[1], SessionEvent::MediaReady(d) if d.media_id == 2));
    assert_eq!(session.current_media_id(), 2);
}

#[test]
fn test_media_request_fires_before_readiness() {
    let mut service = SimulatedService::with_media_count(3).switch_latency(3);
    let (mut session, mut events) = ready(&mut service);
    session.start(&mut service, 0).unwrap();
    for _ in 0..5 {
        session.tick(&mut service, &mut events);
    }
    events.clear();

    session.change_media(&mut service, &mut events, 2).unwrap();
    assert_eq!(events, vec![SessionEvent::MediaRequest]);
    assert!(session.is_switching());
    assert!(!session.can_render());
}

#[test]
fn test_stop_then_start_recovers() {
    let mut service = SimulatedService::with_media_count(3);
    let (mut session, mut events) = ready(&mut service);
    session.start(&mut service, 0).unwrap();
    session.tick(&mut service, &mut events);
    session.pause(&mut service, &mut events, true);

    session.stop(&mut service, &mut events);
    assert!(!session.is_started());
    assert_eq!(session.current_media_id(), INVALID_MEDIA_ID);
    assert_eq!(session.requested_media_id(), INVALID_MEDIA_ID);
    assert!(service.calls().contains(&ServiceCall::RequestMedia(INVALID_MEDIA_ID as u32)));
    assert!(!service.calls().contains(&ServiceCall::Destroy));

    events.clear();
    session.start(&mut service, 0).unwrap();
    session.tick(&mut service, &mut events);

    assert_eq!(session.current_media_id(), 0);
    assert!(session.is_started());
    assert!(session.is_media_ready());
    assert!(!session.is_paused());
    assert_eq!(ready_events(&events).len(), 3);
}

#[test]
fn test_stop_fires_media_request() {
    let mut service = SimulatedService::with_media_count(1);
    let (mut session, mut events) = ready(&mut service);
    session.start(&mut service, 0).unwrap();
    session.tick(&mut service, &mut events);
    events.clear();

    session.stop(&mut service, &mut events);
    assert_eq!(events, vec![SessionEvent::MediaRequest]);
}

#[test]
fn test_change_media_before_start_acts_as_start() {
    let mut service = SimulatedService::with_media_count(3);
    let (mut session, mut events) = ready(&mut service);
    service.clear_calls();

    session.change_media(&mut service, &mut events, 1).unwrap();
    assert!(session.is_started());
    assert_eq!(session.requested_media_id(), 1);
    assert_eq!(service.lifecycle_calls(), vec![ServiceCall::Start(1)]);
    assert!(events.is_empty());
}

#[test]
fn test_scenario_start_then_busy_switch() {
    let mut service = SimulatedService::with_media_count(3);
    let (mut session, mut events) = ready(&mut service);

    session.start(&mut service, 0).unwrap();
    session.tick(&mut service, &mut events);
    let ready = ready_events(&events);
    assert_eq!(ready.len(), 3);
    assert!(
        matches!(ready[1], SessionEvent::MediaReady(d) if d.media_kind == MediaKind::Video)
    );
    assert_eq!(session.media_kind(), Some(MediaKind::Video));

    service.set_switch_latency(3);
    session.change_media(&mut service, &mut events, 1).unwrap();
    events.clear();

    for tick in 1..=3 {
        session.tick(&mut service, &mut events);
        assert!(events.is_empty(), "events fired on tick {}", tick);
        assert_eq!(session.current_media_id(), 0);
    }

    session.tick(&mut service, &mut events);
    let ready = ready_events(&events);
    assert_eq!(ready.len(), 3);
    assert!(matches!(
        ready[0],
        SessionEvent::PreMediaReady(d) if d.media_kind == MediaKind::MultiViewDepth
    ));
    assert_eq!(session.current_media_id(), 1);

    events.clear();
    session.tick(&mut service, &mut events);
    assert!(events.is_empty());
}

#[test]
fn test_init_waits_without_timeout() {
    let mut service = SimulatedService::with_media_count(1).init_latency(2000);
    let mut session = MediaSession::new();
    let mut events = Vec::new();
    session
        .initialize(&mut service, PathBuf::from("config.json"), true)
        .unwrap();

    for _ in 0..2000 {
        session.tick(&mut service, &mut events);
    }
    assert_eq!(session.init_state(), InitState::Initializing);
    assert!(events.is_empty());

    session.tick(&mut service, &mut events);
    assert!(session.is_initialized());
    assert_eq!(events.len(), 1);
}

#[test]
fn test_error_from_service_thread_reaches_main_loop() {
    let mut service = SimulatedService::with_media_count(1);
    let (mut session, mut events) = ready(&mut service);

    service
        .raise_error_from_thread(ErrorLevel::Warning, 16)
        .unwrap()
        .join()
        .unwrap();
    assert!(events.is_empty());

    session.tick(&mut service, &mut events);
    match events.as_slice() {
        [SessionEvent::Error(error)] => {
            assert_eq!(error.level, ErrorLevel::Warning);
            assert_eq!(error.describe(), "Segment not found");
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_latest_error_wins() {
    let mut service = SimulatedService::with_media_count(1);
    let (mut session, mut events) = ready(&mut service);

    service.raise_error(ErrorLevel::Info, 0);
    service.raise_error(ErrorLevel::Error, 201);
    session.tick(&mut service, &mut events);

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SessionEvent::Error(e) if e.code == 201));
}
