use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ServiceError;
use crate::service::ErrorCallback;

/// Latest pending service error.
///
/// The service writes it from its own thread through the callback returned by
/// [`ErrorMailbox::callback`]; the main loop takes it once per tick. Only the most recent
/// error is kept.
#[derive(Clone, Default)]
pub struct ErrorMailbox {
    latest: Arc<Mutex<Option<ServiceError>>>,
}

impl ErrorMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, error: ServiceError) {
        // A panic while holding the slot leaves nothing half-written
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn take(&self) -> Option<ServiceError> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn callback(&self) -> ErrorCallback {
        let mailbox = self.clone();
        Box::new(move |error| mailbox.post(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorLevel;

    #[test]
    fn test_keeps_latest_only() {
        let mailbox = ErrorMailbox::new();
        mailbox.post(ServiceError::new(ErrorLevel::Info, 0));
        mailbox.post(ServiceError::new(ErrorLevel::Error, 7));

        assert_eq!(mailbox.take(), Some(ServiceError::new(ErrorLevel::Error, 7)));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn test_callback_from_other_thread() {
        let mailbox = ErrorMailbox::new();
        let callback = mailbox.callback();

        std::thread::spawn(move || callback(ServiceError::new(ErrorLevel::Warning, 101)))
            .join()
            .unwrap();

        let error = mailbox.take().unwrap();
        assert_eq!(error.level, ErrorLevel::Warning);
        assert_eq!(error.code, 101);
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let mailbox = ErrorMailbox::new();
        let latest = mailbox.latest.clone();
        let result = std::thread::spawn(move || {
            let _slot = latest.lock().unwrap();
            panic!("callback panicked while holding the slot");
        })
        .join();
        assert!(result.is_err());
        assert!(mailbox.latest.is_poisoned());

        mailbox.post(ServiceError::new(ErrorLevel::Error, 3));
        assert_eq!(mailbox.take(), Some(ServiceError::new(ErrorLevel::Error, 3)));
        assert_eq!(mailbox.take(), None);
    }
}
