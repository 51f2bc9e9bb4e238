use std::path::PathBuf;

use crate::error::ServiceError;
use crate::service::{DecoderService, MediaKind};

/// What presenters learn about the media that just became current
#[derive(Debug, Clone, PartialEq)]
pub struct RenderData {
    pub media_id: i32,
    pub media_kind: MediaKind,
    pub media_name: String,
}

/// Lifecycle notifications, delivered in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Initialisation completed; carries the resolved decoder config path
    Init(PathBuf),
    /// A different media was requested (or playback stopped); current visuals are stale
    MediaRequest,
    PreMediaReady(RenderData),
    MediaReady(RenderData),
    PostMediaReady(RenderData),
    Pause(bool),
    Error(ServiceError),
}

/// Receives session events synchronously, with access to the service so handlers can
/// configure it before the session continues
pub trait SessionObserver {
    fn on_event(&mut self, event: &SessionEvent, service: &mut dyn DecoderService);
}

/// Collects events without reacting to them
impl SessionObserver for Vec<SessionEvent> {
    fn on_event(&mut self, event: &SessionEvent, _service: &mut dyn DecoderService) {
        self.push(event.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&SessionEvent)>;

/// Ordered publish/subscribe list for components that only observe the session
/// (haptics, notifications). Delivery follows subscription order.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&SessionEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false when the subscription was unknown
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub fn publish(&mut self, event: &SessionEvent) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
