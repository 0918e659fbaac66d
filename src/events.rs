use rustc_hash::FxHashMap;
use tracing::trace;

/// A decoded inbound message together with its wire identity.
#[derive(Debug, PartialEq)]
pub struct MessageEnvelope<M> {
    pub name: &'static str,
    pub cmd: u16,
    pub seq: u16,
    pub msg: M,
}

/// Lifecycle and push events emitted by the session engine.
///
/// One tagged union instead of stringly-typed dynamic emission: every event a session
///  can produce is a variant here, and subscriptions are keyed by the variant tag
///  ([EventKind]).
#[derive(Debug)]
pub enum SessionEvent<M> {
    /// The transport established a fresh connection.
    Connect,
    Close,
    IoError,
    /// The engine noticed a dead link and started silent reconnection.
    ConnectionLost,
    /// A reconnection cycle finished, successfully or not.
    ConnectReestablished { success: bool },
    /// The link is stalled: heartbeats go unacknowledged although the socket may still
    ///  report itself connected.
    NetHeartBlock,
    /// The server answered some request with the generic failure sentinel.
    ErrorCode { ecode: u32 },
    /// Raised while at least one non-silent call is in flight, lowered when the last
    ///  one resolves - drives the application's busy indicator.
    Busy { active: bool },
    /// An unsolicited server push for which a listener is registered.
    Push { envelope: MessageEnvelope<M> },
}

impl<M> SessionEvent<M> {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Connect => EventKind::Connect,
            SessionEvent::Close => EventKind::Close,
            SessionEvent::IoError => EventKind::IoError,
            SessionEvent::ConnectionLost => EventKind::ConnectionLost,
            SessionEvent::ConnectReestablished { .. } => EventKind::ConnectReestablished,
            SessionEvent::NetHeartBlock => EventKind::NetHeartBlock,
            SessionEvent::ErrorCode { .. } => EventKind::ErrorCode,
            SessionEvent::Busy { .. } => EventKind::Busy,
            SessionEvent::Push { envelope } => EventKind::Push(envelope.name),
        }
    }
}

/// Variant tag of [SessionEvent], used as subscription key. Pushes are keyed per
///  message name.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum EventKind {
    Connect,
    Close,
    IoError,
    ConnectionLost,
    ConnectReestablished,
    NetHeartBlock,
    ErrorCode,
    Busy,
    Push(&'static str),
}

/// Handle for removing a subscription.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct ListenerId(u64);

struct Registration<M> {
    id: ListenerId,
    once: bool,
    handler: Box<dyn FnMut(&SessionEvent<M>)>,
}

/// Typed subscription registry: at most one delivery per emitted event per
///  registration, registrations identified by [ListenerId].
pub struct EventHub<M> {
    listeners: FxHashMap<EventKind, Vec<Registration<M>>>,
    next_id: u64,
}

impl<M> EventHub<M> {
    pub fn new() -> EventHub<M> {
        EventHub {
            listeners: FxHashMap::default(),
            next_id: 0,
        }
    }

    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&SessionEvent<M>) + 'static,
    ) -> ListenerId {
        self.subscribe_impl(kind, Box::new(handler), false)
    }

    /// Like [EventHub::subscribe], but the registration is removed after the first
    ///  delivery.
    pub fn subscribe_once(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&SessionEvent<M>) + 'static,
    ) -> ListenerId {
        self.subscribe_impl(kind, Box::new(handler), true)
    }

    fn subscribe_impl(
        &mut self,
        kind: EventKind,
        handler: Box<dyn FnMut(&SessionEvent<M>)>,
        once: bool,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(kind).or_default().push(Registration {
            id,
            once,
            handler,
        });
        id
    }

    /// Returns true if a registration was removed.
    pub fn unsubscribe(&mut self, kind: EventKind, id: ListenerId) -> bool {
        match self.listeners.get_mut(&kind) {
            Some(regs) => {
                let before = regs.len();
                regs.retain(|r| r.id != id);
                before != regs.len()
            }
            None => false,
        }
    }

    pub fn has_listener(&self, kind: EventKind) -> bool {
        self.listeners.get(&kind).is_some_and(|regs| !regs.is_empty())
    }

    pub fn emit(&mut self, event: &SessionEvent<M>) {
        let kind = event.kind();
        let Some(regs) = self.listeners.get_mut(&kind) else {
            trace!("no listener for {:?}", kind);
            return;
        };

        for reg in regs.iter_mut() {
            (reg.handler)(event);
        }
        regs.retain(|r| !r.once);
    }
}

impl<M> Default for EventHub<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn counter() -> (Arc<Mutex<u32>>, impl FnMut(&SessionEvent<()>)) {
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        (count, move |_: &SessionEvent<()>| {
            *c.lock().unwrap() += 1;
        })
    }

    #[test]
    fn test_delivery_per_subscription() {
        let mut hub: EventHub<()> = EventHub::new();
        let (count, handler) = counter();
        hub.subscribe(EventKind::Connect, handler);

        hub.emit(&SessionEvent::Connect);
        hub.emit(&SessionEvent::Connect);
        hub.emit(&SessionEvent::Close);

        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let mut hub: EventHub<()> = EventHub::new();
        let (count, handler) = counter();
        let id = hub.subscribe(EventKind::Close, handler);

        hub.emit(&SessionEvent::Close);
        assert!(hub.unsubscribe(EventKind::Close, id));
        assert!(!hub.unsubscribe(EventKind::Close, id));
        hub.emit(&SessionEvent::Close);

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_subscribe_once() {
        let mut hub: EventHub<()> = EventHub::new();
        let (count, handler) = counter();
        hub.subscribe_once(EventKind::NetHeartBlock, handler);

        hub.emit(&SessionEvent::NetHeartBlock);
        hub.emit(&SessionEvent::NetHeartBlock);

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(!hub.has_listener(EventKind::NetHeartBlock));
    }

    #[test]
    fn test_push_events_keyed_by_name() {
        let mut hub: EventHub<u32> = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        hub.subscribe(EventKind::Push("chat_s2c"), move |evt| {
            if let SessionEvent::Push { envelope } = evt {
                s.lock().unwrap().push(envelope.msg);
            }
        });

        hub.emit(&SessionEvent::Push {
            envelope: MessageEnvelope {
                name: "chat_s2c",
                cmd: 7,
                seq: 0,
                msg: 42,
            },
        });
        hub.emit(&SessionEvent::Push {
            envelope: MessageEnvelope {
                name: "other_s2c",
                cmd: 8,
                seq: 0,
                msg: 1,
            },
        });

        assert_eq!(*seen.lock().unwrap(), vec![42]);
        assert!(hub.has_listener(EventKind::Push("chat_s2c")));
        assert!(!hub.has_listener(EventKind::Push("other_s2c")));
    }
}
