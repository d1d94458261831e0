//! Observer attachments
//!
//! Every attached observer owns an unbounded receiver. Broadcasts happen
//! while the engine holds its state lock, so each observer sees every event
//! exactly once and in the order the engine produced them. Dropping an
//! attachment detaches it.

use std::sync::Weak;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

use crate::state::TimerEvent;

/// Identifies one attachment for `detach`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentHandle(u64);

impl AttachmentHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Whatever an attachment was registered with; told when it is dropped
pub(crate) trait Detach: Send + Sync + 'static {
    fn detach(&self, handle: AttachmentHandle);
}

/// A live feed of timer events for one observer
#[derive(Debug)]
pub struct Attachment {
    handle: AttachmentHandle,
    events: mpsc::UnboundedReceiver<TimerEvent>,
    owner: Weak<dyn Detach>,
}

impl Attachment {
    pub fn handle(&self) -> AttachmentHandle {
        self.handle
    }

    /// Wait for the next event. Returns `None` once detached and drained.
    pub async fn recv(&mut self) -> Option<TimerEvent> {
        self.events.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<TimerEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Every event delivered so far
    pub fn drain(&mut self) -> Vec<TimerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(self.handle);
        }
    }
}

/// Observers in attachment order
#[derive(Debug, Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    observers: Vec<(AttachmentHandle, mpsc::UnboundedSender<TimerEvent>)>,
}

impl ObserverRegistry {
    /// Register a new observer; `initial` is the first event it receives.
    /// `owner` must not be locked by the caller when the attachment is dropped.
    pub(crate) fn register(&mut self, initial: TimerEvent, owner: Weak<dyn Detach>) -> Attachment {
        let handle = AttachmentHandle(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        // rx is alive, so this cannot fail
        let _ = tx.send(initial);
        self.observers.push((handle, tx));
        debug!("Observer {} attached ({} total)", handle.0, self.observers.len());

        Attachment {
            handle,
            events: rx,
            owner,
        }
    }

    pub(crate) fn remove(&mut self, handle: AttachmentHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(h, _)| *h != handle);
        let removed = self.observers.len() != before;
        if removed {
            debug!("Observer {} detached ({} remaining)", handle.0, self.observers.len());
        }
        removed
    }

    /// Deliver to every observer; observers whose receiver is gone are dropped
    pub(crate) fn broadcast(&mut self, event: &TimerEvent) {
        self.observers.retain(|(handle, tx)| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                debug!("Observer {} went away, removing", handle.0);
            }
            delivered
        });
    }

    /// Observers whose receiver still exists
    pub(crate) fn len(&self) -> usize {
        self.observers.iter().filter(|(_, tx)| !tx.is_closed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Owner {
        detached: Mutex<Vec<AttachmentHandle>>,
    }

    impl Detach for Owner {
        fn detach(&self, handle: AttachmentHandle) {
            self.detached.lock().unwrap().push(handle);
        }
    }

    fn unowned() -> Weak<dyn Detach> {
        Weak::<Owner>::new()
    }

    #[test]
    fn register_delivers_initial_event_first() {
        let mut registry = ObserverRegistry::default();
        let mut attachment = registry.register(TimerEvent::Tick { elapsed_seconds: 4 }, unowned());
        registry.broadcast(&TimerEvent::Tick { elapsed_seconds: 5 });

        assert_eq!(
            attachment.drain(),
            vec![
                TimerEvent::Tick { elapsed_seconds: 4 },
                TimerEvent::Tick { elapsed_seconds: 5 },
            ]
        );
    }

    #[test]
    fn handles_are_unique() {
        let mut registry = ObserverRegistry::default();
        let a = registry.register(TimerEvent::Tick { elapsed_seconds: 0 }, unowned());
        let b = registry.register(TimerEvent::Tick { elapsed_seconds: 0 }, unowned());
        assert_ne!(a.handle(), b.handle());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removed_observer_gets_nothing_more() {
        let mut registry = ObserverRegistry::default();
        let mut kept = registry.register(TimerEvent::Tick { elapsed_seconds: 0 }, unowned());
        let mut gone = registry.register(TimerEvent::Tick { elapsed_seconds: 0 }, unowned());

        assert!(registry.remove(gone.handle()));
        assert!(!registry.remove(gone.handle()));
        registry.broadcast(&TimerEvent::Tick { elapsed_seconds: 1 });

        assert_eq!(kept.drain().len(), 2);
        assert_eq!(gone.drain().len(), 1);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut registry = ObserverRegistry::default();
        let _kept = registry.register(TimerEvent::Tick { elapsed_seconds: 0 }, unowned());
        drop(registry.register(TimerEvent::Tick { elapsed_seconds: 0 }, unowned()));

        registry.broadcast(&TimerEvent::Tick { elapsed_seconds: 1 });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_an_attachment_tells_its_owner() {
        let owner = Arc::new(Owner::default());
        let weak: Weak<dyn Detach> = Arc::downgrade(&owner) as Weak<Owner>;
        let mut registry = ObserverRegistry::default();
        let attachment = registry.register(TimerEvent::Tick { elapsed_seconds: 0 }, weak);
        let handle = attachment.handle();

        drop(attachment);
        assert_eq!(*owner.detached.lock().unwrap(), vec![handle]);
        // Not broadcast to since, but no longer counted
        assert_eq!(registry.len(), 0);
    }
}
