use std::sync::Arc;

use parking_lot::Mutex;

use super::frame::Frame;

/// Receiver of frames broadcast by a [`StreamBus`].
///
/// Callbacks run synchronously on the producer's thread. They must not call
/// back into [`StreamBus::register`] / [`StreamBus::unregister`] on the same
/// bus.
pub trait FrameObserver: Send + Sync {
    fn on_frame(&self, source: &StreamBus, frame: &Frame);

    fn on_error(&self, source: &StreamBus, code: i32) {
        tracing::warn!(
            channel = source.channel(),
            stream_id = source.stream_id(),
            code,
            "stream source reported error"
        );
    }
}

/// Publish/subscribe point for one (channel, stream-id).
///
/// Holds an ordered set of distinct observers, compared by identity. The
/// observer list lock is released before callbacks run, so a slow observer
/// never blocks registration for longer than a list copy.
pub struct StreamBus {
    channel: u32,
    stream_id: u32,
    observers: Mutex<Vec<Arc<dyn FrameObserver>>>,
}

fn same_observer(a: &Arc<dyn FrameObserver>, b: &Arc<dyn FrameObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl StreamBus {
    pub fn new(channel: u32, stream_id: u32) -> Self {
        Self {
            channel,
            stream_id,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Add an observer. Returns `false` if it is already registered.
    pub fn register(&self, observer: Arc<dyn FrameObserver>) -> bool {
        let mut observers = self.observers.lock();
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        observers.push(observer);
        tracing::debug!(
            channel = self.channel,
            stream_id = self.stream_id,
            observers = observers.len(),
            "observer registered"
        );
        true
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, observer: &Arc<dyn FrameObserver>) -> bool {
        let mut observers = self.observers.lock();
        let Some(pos) = observers.iter().position(|o| same_observer(o, observer)) else {
            return false;
        };
        observers.remove(pos);
        tracing::debug!(
            channel = self.channel,
            stream_id = self.stream_id,
            observers = observers.len(),
            "observer unregistered"
        );
        true
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Deliver a frame to every observer in registration order.
    pub fn broadcast(&self, frame: &Frame) {
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_frame(self, frame);
        }
    }

    pub fn broadcast_error(&self, code: i32) {
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_error(self, code);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::stream::frame::FrameKind;

    struct Counter {
        frames: AtomicUsize,
        errors: AtomicUsize,
        order: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    }

    impl FrameObserver for Counter {
        fn on_frame(&self, _source: &StreamBus, _frame: &Frame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(self.name);
        }

        fn on_error(&self, _source: &StreamBus, _code: i32) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(name: &'static str, order: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Counter> {
        Arc::new(Counter {
            frames: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            order: order.clone(),
            name,
        })
    }

    #[test]
    fn duplicates_are_ignored() {
        let bus = StreamBus::new(0, 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = counter("a", &order);
        assert!(bus.register(a.clone()));
        assert!(!bus.register(a.clone()));
        assert_eq!(bus.observer_count(), 1);

        bus.broadcast(&Frame::single(FrameKind::Audio, 0, vec![1u8]));
        assert_eq!(a.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_follows_registration_order() {
        let bus = StreamBus::new(1, 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = counter("a", &order);
        let b = counter("b", &order);
        bus.register(a.clone());
        bus.register(b.clone());
        bus.broadcast(&Frame::single(FrameKind::VideoP, 40, vec![0u8, 0, 0, 1, 0x41]));
        assert_eq!(*order.lock(), vec!["a", "b"]);
    }

    #[test]
    fn unregister_by_identity() {
        let bus = StreamBus::new(0, 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let a: Arc<dyn FrameObserver> = counter("a", &order);
        let b: Arc<dyn FrameObserver> = counter("b", &order);
        bus.register(a.clone());
        bus.register(b.clone());
        assert!(bus.unregister(&a));
        assert!(!bus.unregister(&a));
        assert_eq!(bus.observer_count(), 1);
        bus.broadcast(&Frame::single(FrameKind::Audio, 0, vec![1u8]));
        assert_eq!(*order.lock(), vec!["b"]);
    }

    #[test]
    fn errors_reach_every_observer() {
        let bus = StreamBus::new(0, 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = counter("a", &order);
        let b = counter("b", &order);
        bus.register(a.clone());
        bus.register(b.clone());
        bus.broadcast_error(-5);
        assert_eq!(a.errors.load(Ordering::SeqCst), 1);
        assert_eq!(b.errors.load(Ordering::SeqCst), 1);
        assert!(order.lock().is_empty());
    }
}
