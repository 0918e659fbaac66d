use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::buffer_pool::BufferPool;
use crate::clock::{after, is_due, Clock};
use crate::config::SessionConfig;
use crate::events::{EventHub, EventKind, ListenerId, MessageEnvelope, SessionEvent};
use crate::schema::{MessageDescriptor, SchemaTable};
use crate::transport::{Frame, Transport};

/// Connection/session state of one engine instance.
///
/// `Rejected` is terminal (administrative): all timers are cancelled and no automatic
///  reconnection happens until the flag is cleared.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    SilentReconnecting,
    FullReconnecting,
    Rejected,
}

/// Outcome of one request: the decoded response envelope, or the server's error code
///  (or the locally generated timeout sentinel).
pub type CallReply<M> = Result<MessageEnvelope<M>, u32>;

/// Per-call settings. `silent` calls do not raise the busy indicator (the original
///  protocol encoded this as a negative timeout).
#[derive(Clone, Copy, Debug, Default)]
pub struct CallOptions {
    /// Falls back to [SessionConfig::default_call_timeout] when `None`.
    pub timeout: Option<Duration>,
    pub silent: bool,
}

/// Completion handle passed to the application's relogin/reconnect hooks.
///
/// Resolved exactly once: `succeed`/`fail` consume the ticket, and dropping it
///  unresolved counts as failure. The engine picks the outcome up on its next tick.
pub struct ReauthTicket {
    tx: oneshot::Sender<bool>,
}

impl ReauthTicket {
    pub fn succeed(self) {
        let _ = self.tx.send(true);
    }

    pub fn fail(self) {
        let _ = self.tx.send(false);
    }
}

/// Application hook performing session re-establishment (silent reconnect) or a full
///  re-authentication handshake (relogin).
pub type ReauthHook = Box<dyn FnMut(ReauthTicket)>;

struct PendingCall<M> {
    deadline: Instant,
    silent: bool,
    /// Local send time (epoch millis) when this call doubles as a server-time probe.
    time_sync: Option<u64>,
    reply: Box<dyn FnOnce(CallReply<M>)>,
}

#[derive(Clone, Copy, Debug)]
struct KeepAliveRecord {
    seq: u16,
    sent_at_ms: u64,
}

/// The session engine: owns sequence-number allocation, the pending-call table, the
///  keep-alive loop and the reconnection state machine.
///
/// Single-threaded and synchronous: every state transition happens inside the method
///  that triggers it - a socket event forwarded by the composition root, a [tick], or an
///  application call. A pending call is removed from the table strictly before its
///  callback fires, so callbacks never observe a half-updated table.
///
/// Interval behavior (keep-alive, silent-reconnect polling, the timeout sweep) is
///  deadline-based: the composition root calls [SessionEngine::tick] every
///  [SessionConfig::sweep_interval], and the injected [Clock] supplies time. Nothing is
///  tied to a render loop.
pub struct SessionEngine<M> {
    schema: SchemaTable<M>,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    pool: Arc<BufferPool>,
    config: SessionConfig,
    events: EventHub<M>,

    state: LinkState,
    pending: FxHashMap<u16, PendingCall<M>>,
    seq_counter: u16,

    keep_alive: VecDeque<KeepAliveRecord>,
    keep_alive_next: Option<Instant>,
    heart_block_reported: bool,

    reconnect_next: Option<Instant>,
    reconnect_attempts: u32,

    relogin_hook: Option<ReauthHook>,
    reconnect_hook: Option<ReauthHook>,
    relogin_pending: Option<oneshot::Receiver<bool>>,
    reconnect_pending: Option<oneshot::Receiver<bool>>,

    server_clock_offset_ms: i64,
    net_delay_ms: u64,

    no_more_connect: bool,
    busy_shown: bool,
    disposed: bool,
    log_filter: FxHashSet<u16>,
}

impl<M: 'static> SessionEngine<M> {
    pub fn new(
        schema: SchemaTable<M>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
        pool: Arc<BufferPool>,
        config: SessionConfig,
    ) -> anyhow::Result<SessionEngine<M>> {
        config.validate()?;

        // keep-alive and generic-success traffic is noise at trace level
        let mut log_filter = FxHashSet::default();
        log_filter.insert(schema.heartbeat_c2s().cmd);
        log_filter.insert(schema.heartbeat_s2c().cmd);
        log_filter.insert(schema.generic_success().cmd);

        Ok(SessionEngine {
            schema,
            transport,
            clock,
            pool,
            config,
            events: EventHub::new(),
            state: LinkState::Disconnected,
            pending: FxHashMap::default(),
            seq_counter: 0,
            keep_alive: VecDeque::new(),
            keep_alive_next: None,
            heart_block_reported: false,
            reconnect_next: None,
            reconnect_attempts: 0,
            relogin_hook: None,
            reconnect_hook: None,
            relogin_pending: None,
            reconnect_pending: None,
            server_clock_offset_ms: 0,
            net_delay_ms: 0,
            no_more_connect: false,
            busy_shown: false,
            disposed: false,
            log_filter,
        })
    }

    // ------------------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------------------

    /// Points the transport at `address` and starts connecting.
    pub fn init(&mut self, address: &str) {
        assert!(!self.disposed, "init on a disposed session");

        self.transport.reset();
        self.transport.init(address);
        self.transport.connect();
        self.state = LinkState::Connecting;
        self.reconnect_attempts = 0;
        self.reconnect_next = None;
    }

    /// Socket-level `connect` event, forwarded by the composition root.
    pub fn on_connect(&mut self) {
        if self.disposed {
            return;
        }

        match self.state {
            LinkState::Rejected => {}
            LinkState::SilentReconnecting => {
                if self.reconnect_pending.is_some() {
                    // duplicate connect event while the reconnect hook is already running
                    return;
                }

                self.reconnect_next = None;
                self.reconnect_attempts = 0;
                self.restart_keep_alive();

                if self.reconnect_hook.is_some() {
                    let (tx, rx) = oneshot::channel();
                    self.reconnect_pending = Some(rx);
                    if let Some(hook) = &mut self.reconnect_hook {
                        hook(ReauthTicket { tx });
                    }
                } else {
                    self.finish_reconnect_cycle(true);
                }
            }
            LinkState::FullReconnecting => {
                // the relogin hook owns the handshake; just get the keep-alive going again
                self.restart_keep_alive();
            }
            _ => {
                self.state = LinkState::Connected;
                self.reconnect_attempts = 0;
                self.restart_keep_alive();
                self.events.emit(&SessionEvent::Connect);
            }
        }
    }

    /// Socket-level `close` event.
    pub fn on_close(&mut self) {
        self.handle_link_down(SessionEvent::Close);
    }

    /// Socket-level i/o error event.
    pub fn on_io_error(&mut self) {
        self.handle_link_down(SessionEvent::IoError);
    }

    fn handle_link_down(&mut self, event: SessionEvent<M>) {
        if self.disposed {
            return;
        }

        self.stop_keep_alive();
        self.reconnect_next = None;
        self.reconnect_pending = None;
        if !matches!(self.state, LinkState::Rejected | LinkState::FullReconnecting) {
            self.state = LinkState::Disconnected;
        }
        self.events.emit(&event);
    }

    /// The application returned to the foreground - if the link died in the background,
    ///  start bringing it back before the next send runs into the dead socket.
    pub fn notify_foreground(&mut self) {
        if self.disposed {
            return;
        }
        if !self.transport.connected() {
            debug!("foregrounded with a dead link");
            self.begin_silent_reconnect();
        }
    }

    pub fn pause(&mut self) {
        self.transport.pause();
    }

    pub fn resume(&mut self) {
        self.transport.resume();
    }

    /// Cancels all timers and fails every pending call with the timeout sentinel (a bulk
    ///  local timeout). Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.keep_alive_next = None;
        self.reconnect_next = None;
        self.relogin_pending = None;
        self.reconnect_pending = None;
        self.keep_alive.clear();

        let seqs = self.pending.keys().copied().collect::<Vec<_>>();
        for seq in seqs {
            if let Some(pending) = self.pending.remove(&seq) {
                (pending.reply)(Err(self.config.timeout_ecode));
            }
        }
        if self.busy_shown {
            self.busy_shown = false;
            self.events.emit(&SessionEvent::Busy { active: false });
        }

        self.transport.reset();
    }

    // ------------------------------------------------------------------------------
    // requests
    // ------------------------------------------------------------------------------

    /// Encodes and sends one message without expecting a response. Returns the sequence
    ///  id assigned to the frame.
    ///
    /// If the transport is down, the frame is not sent - instead a silent reconnect
    ///  cycle starts (unless suppressed or rejected).
    pub fn send(&mut self, descriptor: &MessageDescriptor<M>, msg: &M) -> anyhow::Result<u16> {
        assert!(!self.disposed, "send on a disposed session");

        let seq = self.next_seq();
        if !self.log_filter.contains(&descriptor.cmd) {
            trace!("send {} seq {}", descriptor.name, seq);
        }

        if self.transport.connected() {
            let mut buf = self.pool.get();
            match (descriptor.encode)(msg, &mut buf) {
                Ok(()) => {
                    self.transport.send(seq, descriptor.cmd, buf.as_slice());
                    self.pool.put(buf);
                }
                Err(e) => {
                    self.pool.put(buf);
                    return Err(e);
                }
            }
        } else {
            self.begin_silent_reconnect();
        }

        Ok(seq)
    }

    /// Sends a request and registers callbacks for the correlated response.
    ///
    /// The pending entry is registered even when the transport is down, so a response is
    ///  not lost if the link recovers within the timeout window.
    pub fn call(
        &mut self,
        descriptor: &MessageDescriptor<M>,
        msg: &M,
        reply: impl FnOnce(CallReply<M>) + 'static,
    ) -> anyhow::Result<u16> {
        self.call_with(descriptor, msg, CallOptions::default(), reply)
    }

    pub fn call_with(
        &mut self,
        descriptor: &MessageDescriptor<M>,
        msg: &M,
        options: CallOptions,
        reply: impl FnOnce(CallReply<M>) + 'static,
    ) -> anyhow::Result<u16> {
        let seq = self.send(descriptor, msg)?;
        self.register_pending(seq, options, None, Box::new(reply));
        Ok(seq)
    }

    /// Promise-style wrapper of [SessionEngine::call]: the returned receiver resolves
    ///  exactly once, with the response or the error code.
    pub fn call_async(
        &mut self,
        descriptor: &MessageDescriptor<M>,
        msg: &M,
        options: CallOptions,
    ) -> anyhow::Result<(u16, oneshot::Receiver<CallReply<M>>)> {
        let (tx, rx) = oneshot::channel();
        let seq = self.call_with(descriptor, msg, options, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        Ok((seq, rx))
    }

    /// Issues a heartbeat call to (re)measure the server-clock offset and network delay
    ///  immediately, outside the regular keep-alive cadence.
    pub fn sync_server_time(
        &mut self,
        on_done: Option<Box<dyn FnOnce(Result<(), u32>)>>,
    ) -> anyhow::Result<u16> {
        let heartbeat = self.schema.new_heartbeat();
        let descriptor = *self.schema.heartbeat_c2s();
        let seq = self.send(&descriptor, &heartbeat)?;

        let sent_at_ms = self.clock.unix_millis();
        self.register_pending(
            seq,
            CallOptions::default(),
            Some(sent_at_ms),
            Box::new(move |outcome| {
                if let Some(cb) = on_done {
                    cb(outcome.map(|_| ()));
                }
            }),
        );
        Ok(seq)
    }

    fn register_pending(
        &mut self,
        seq: u16,
        options: CallOptions,
        time_sync: Option<u64>,
        reply: Box<dyn FnOnce(CallReply<M>)>,
    ) {
        let timeout = options.timeout.unwrap_or(self.config.default_call_timeout);
        self.pending.insert(
            seq,
            PendingCall {
                deadline: self.clock.now() + timeout,
                silent: options.silent,
                time_sync,
                reply,
            },
        );

        if !options.silent && !self.busy_shown {
            self.busy_shown = true;
            self.events.emit(&SessionEvent::Busy { active: true });
        }
    }

    /// Allocates the next correlation id: a 16-bit monotonic counter that wraps from
    ///  0xFFFE back to 1 (0 is reserved as "no id") and never hands out an id that still
    ///  has a call pending.
    fn next_seq(&mut self) -> u16 {
        assert!(
            self.pending.len() < 0xFFFE,
            "this is a bug: the pending-call table exhausted the sequence id space"
        );
        loop {
            self.seq_counter = if self.seq_counter >= 0xFFFE {
                1
            } else {
                self.seq_counter + 1
            };
            if !self.pending.contains_key(&self.seq_counter) {
                return self.seq_counter;
            }
        }
    }

    // ------------------------------------------------------------------------------
    // inbound dispatch
    // ------------------------------------------------------------------------------

    /// One inbound frame from the transport. The frame's buffer goes back to the pool
    ///  right after decoding, before any callback runs.
    pub fn on_frame(&mut self, frame: Frame) {
        if self.disposed {
            return;
        }
        let Frame { cmd, seq, mut buf } = frame;

        let Some(descriptor) = self.schema.descriptor(cmd).copied() else {
            // not an error: unrecognized pushes from newer servers are skipped
            debug!("unknown cmd {} seq {} - discarding", cmd, seq);
            self.pool.put(buf);
            return;
        };

        let decoded = (descriptor.decode)(&mut buf);
        self.pool.put(buf);

        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                // fatal for this frame only, the session keeps going
                warn!("failed to decode {} frame seq {}: {:#}", descriptor.name, seq, e);
                return;
            }
        };

        if !self.log_filter.contains(&cmd) {
            trace!("received {} seq {}", descriptor.name, seq);
        }

        if let Some(pending) = self.pending.remove(&seq) {
            self.resolve_pending(descriptor, seq, msg, pending);
        } else if self.schema.is_generic_failure(cmd) {
            // response to a call that already timed out locally
            let ecode = self.schema.failure_ecode(&msg).unwrap_or(0);
            self.events.emit(&SessionEvent::ErrorCode { ecode });
        } else if self.events.has_listener(EventKind::Push(descriptor.name)) {
            self.events.emit(&SessionEvent::Push {
                envelope: MessageEnvelope {
                    name: descriptor.name,
                    cmd,
                    seq,
                    msg,
                },
            });
        } else if self.schema.is_heartbeat_response(cmd) {
            self.reconcile_keep_alive(seq, &msg);
        } else if !self.schema.is_generic_success(cmd) {
            trace!("{} has no listener", descriptor.name);
        }

        self.update_busy_indicator();
    }

    fn resolve_pending(
        &mut self,
        descriptor: MessageDescriptor<M>,
        seq: u16,
        msg: M,
        pending: PendingCall<M>,
    ) {
        if self.schema.is_generic_failure(descriptor.cmd) {
            let ecode = self.schema.failure_ecode(&msg).unwrap_or(0);
            (pending.reply)(Err(ecode));
            self.events.emit(&SessionEvent::ErrorCode { ecode });
        } else {
            if let Some(sent_at_ms) = pending.time_sync {
                if let Some(server_ms) = self.schema.heartbeat_now_ms(&msg) {
                    self.update_server_clock(server_ms, sent_at_ms);
                }
            }
            (pending.reply)(Ok(MessageEnvelope {
                name: descriptor.name,
                cmd: descriptor.cmd,
                seq,
                msg,
            }));
        }
    }

    fn reconcile_keep_alive(&mut self, seq: u16, msg: &M) {
        // ids are monotonic within a connection cycle, so everything at or below the
        // acknowledged id is settled - late acks lost to a prior cycle drop out here too
        while let Some(front) = self.keep_alive.front().copied() {
            if front.seq == seq {
                if let Some(server_ms) = self.schema.heartbeat_now_ms(msg) {
                    self.update_server_clock(server_ms, front.sent_at_ms);
                }
                self.keep_alive.pop_front();
                self.heart_block_reported = false;
            } else if front.seq > seq {
                break;
            } else {
                self.keep_alive.pop_front();
            }
        }
    }

    fn update_server_clock(&mut self, server_ms: u64, sent_at_ms: u64) {
        let now = self.clock.unix_millis();
        let rtt = now.saturating_sub(sent_at_ms);

        // assume symmetric latency: the server stamped its clock half a round trip ago
        self.server_clock_offset_ms =
            (server_ms as f64 + 0.5 * rtt as f64 + 0.5 - now as f64).floor() as i64;
        self.net_delay_ms = rtt;
        trace!(
            "server clock offset {}ms, rtt {}ms",
            self.server_clock_offset_ms,
            rtt
        );
    }

    fn update_busy_indicator(&mut self) {
        let busy = self.pending.values().any(|p| !p.silent);
        if self.busy_shown && !busy {
            self.busy_shown = false;
            self.events.emit(&SessionEvent::Busy { active: false });
        }
    }

    // ------------------------------------------------------------------------------
    // periodic work
    // ------------------------------------------------------------------------------

    /// Periodic driver entry point, to be called every [SessionConfig::sweep_interval].
    ///  Runs the timeout sweep, the keep-alive loop, stall detection, silent-reconnect
    ///  polling and reauth-ticket collection.
    pub fn tick(&mut self) {
        if self.disposed {
            return;
        }
        let now = self.clock.now();

        self.sweep_timeouts(now);
        self.poll_keep_alive(now);
        self.check_heartbeat_stall();
        self.poll_silent_reconnect(now);
        self.poll_reauth_tickets();
    }

    fn sweep_timeouts(&mut self, now: Instant) {
        // collect first - finalizing while walking the table would corrupt the iteration
        let expired = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(seq, _)| *seq)
            .collect::<Vec<_>>();

        for seq in expired {
            if let Some(pending) = self.pending.remove(&seq) {
                debug!("seq {} timed out", seq);
                (pending.reply)(Err(self.config.timeout_ecode));
            }
        }

        self.update_busy_indicator();
    }

    fn poll_keep_alive(&mut self, now: Instant) {
        if self.state != LinkState::Connected || self.no_more_connect {
            return;
        }
        if !is_due(self.keep_alive_next, now) {
            return;
        }
        self.keep_alive_next = after(now, self.config.heartbeat_interval);

        let heartbeat = self.schema.new_heartbeat();
        let descriptor = *self.schema.heartbeat_c2s();
        match self.send(&descriptor, &heartbeat) {
            Ok(seq) => {
                self.keep_alive.push_back(KeepAliveRecord {
                    seq,
                    sent_at_ms: self.clock.unix_millis(),
                });
                if self.keep_alive.len() >= self.config.keep_alive_ring_max {
                    self.keep_alive.drain(..self.config.keep_alive_ring_trim);
                }
            }
            Err(e) => warn!("failed to send keep-alive: {:#}", e),
        }
    }

    fn check_heartbeat_stall(&mut self) {
        if self.keep_alive.is_empty() || self.heart_block_reported {
            return;
        }

        let now_ms = self.clock.unix_millis();
        let window_ms = self.config.heartbeat_stall_window.as_millis() as u64;
        let stalled = self
            .keep_alive
            .iter()
            .filter(|r| r.sent_at_ms + window_ms <= now_ms)
            .count();

        if stalled >= self.config.heartbeat_stall_count {
            warn!("{} heartbeats unacknowledged - link is stalled", stalled);
            self.escalate_to_full_reconnect();
        }
    }

    fn poll_silent_reconnect(&mut self, now: Instant) {
        if self.state != LinkState::SilentReconnecting || self.reconnect_pending.is_some() {
            return;
        }
        if !is_due(self.reconnect_next, now) {
            return;
        }

        if self.transport.connected() {
            // the connect event races the poll; it will finish the cycle
            self.reconnect_next = None;
            return;
        }

        self.reconnect_attempts += 1;
        if self.reconnect_attempts >= self.config.max_silent_attempts {
            debug!(
                "silent reconnect budget exhausted after {} attempts",
                self.reconnect_attempts
            );
            self.reconnect_next = None;
            self.escalate_to_full_reconnect();
        } else {
            trace!("silent reconnect attempt {}", self.reconnect_attempts);
            self.transport.connect();
            self.reconnect_next = after(now, self.config.reconnect_interval);
        }
    }

    fn poll_reauth_tickets(&mut self) {
        use tokio::sync::oneshot::error::TryRecvError;

        if let Some(rx) = &mut self.reconnect_pending {
            match rx.try_recv() {
                Ok(success) => {
                    self.reconnect_pending = None;
                    self.finish_reconnect_cycle(success);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    self.reconnect_pending = None;
                    self.finish_reconnect_cycle(false);
                }
            }
        }

        if let Some(rx) = &mut self.relogin_pending {
            match rx.try_recv() {
                Ok(success) => {
                    self.relogin_pending = None;
                    self.finish_relogin_cycle(success);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    self.relogin_pending = None;
                    self.finish_relogin_cycle(false);
                }
            }
        }
    }

    // ------------------------------------------------------------------------------
    // reconnection state machine
    // ------------------------------------------------------------------------------

    fn begin_silent_reconnect(&mut self) {
        if self.disposed || self.no_more_connect {
            return;
        }

        match self.state {
            LinkState::Rejected | LinkState::FullReconnecting => {}
            LinkState::SilentReconnecting => {
                // already in a cycle - just nudge the socket
                self.transport.connect();
            }
            _ => {
                debug!("link is down - starting silent reconnect");
                self.state = LinkState::SilentReconnecting;
                self.reconnect_attempts = 0;
                self.transport.connect();
                self.reconnect_next = after(self.clock.now(), self.config.reconnect_interval);
                self.events.emit(&SessionEvent::ConnectionLost);
            }
        }
    }

    fn escalate_to_full_reconnect(&mut self) {
        if self.disposed || matches!(self.state, LinkState::Rejected | LinkState::FullReconnecting)
        {
            return;
        }

        if !self.heart_block_reported {
            self.heart_block_reported = true;
            self.events.emit(&SessionEvent::NetHeartBlock);
        }

        self.state = LinkState::FullReconnecting;
        self.reconnect_next = None;
        self.reconnect_pending = None;

        if self.relogin_hook.is_some() {
            let (tx, rx) = oneshot::channel();
            self.relogin_pending = Some(rx);
            if let Some(hook) = &mut self.relogin_hook {
                hook(ReauthTicket { tx });
            }
        } else {
            warn!("link requires a full relogin but no relogin hook is registered");
            self.state = LinkState::Disconnected;
        }
    }

    fn finish_reconnect_cycle(&mut self, success: bool) {
        if self.state != LinkState::SilentReconnecting {
            return;
        }

        if success {
            debug!("connect reestablished");
            self.state = LinkState::Connected;
        } else {
            self.state = LinkState::Disconnected;
        }
        self.events.emit(&SessionEvent::ConnectReestablished { success });
    }

    fn finish_relogin_cycle(&mut self, success: bool) {
        if self.state != LinkState::FullReconnecting {
            return;
        }

        if success {
            debug!("relogin succeeded - session usable again");
            self.state = LinkState::Connected;
            self.restart_keep_alive();
        } else {
            self.state = LinkState::Disconnected;
        }
        self.events.emit(&SessionEvent::ConnectReestablished { success });
    }

    fn restart_keep_alive(&mut self) {
        self.keep_alive.clear();
        self.heart_block_reported = false;
        self.keep_alive_next = after(self.clock.now(), self.config.heartbeat_interval);
    }

    fn stop_keep_alive(&mut self) {
        self.keep_alive_next = None;
        self.keep_alive.clear();
    }

    // ------------------------------------------------------------------------------
    // administration, listeners, accessors
    // ------------------------------------------------------------------------------

    /// Suppresses automatic reconnection entirely (e.g. when the application is about to
    ///  shut the session down on purpose).
    pub fn no_more_connect(&mut self, value: bool) {
        self.no_more_connect = value;
        if value {
            self.stop_keep_alive();
        }
    }

    /// Administratively rejects the session: terminal until cleared with `false`.
    pub fn reject_connect(&mut self, value: bool) {
        if value {
            self.state = LinkState::Rejected;
            self.reconnect_next = None;
            self.keep_alive_next = None;
            self.reconnect_pending = None;
            self.relogin_pending = None;
        } else if self.state == LinkState::Rejected {
            self.state = LinkState::Disconnected;
        }
    }

    pub fn set_relogin(&mut self, hook: impl FnMut(ReauthTicket) + 'static) {
        self.relogin_hook = Some(Box::new(hook));
    }

    pub fn set_reconnect(&mut self, hook: impl FnMut(ReauthTicket) + 'static) {
        self.reconnect_hook = Some(Box::new(hook));
    }

    /// Suppresses (or re-enables) per-frame trace logging for one cmd.
    pub fn set_log_filter(&mut self, cmd: u16, suppress: bool) {
        if suppress {
            self.log_filter.insert(cmd);
        } else {
            self.log_filter.remove(&cmd);
        }
    }

    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&SessionEvent<M>) + 'static,
    ) -> ListenerId {
        self.events.subscribe(kind, handler)
    }

    pub fn subscribe_once(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&SessionEvent<M>) + 'static,
    ) -> ListenerId {
        self.events.subscribe_once(kind, handler)
    }

    pub fn unsubscribe(&mut self, kind: EventKind, id: ListenerId) -> bool {
        self.events.unsubscribe(kind, id)
    }

    /// Registers a handler for unsolicited pushes of one message type.
    pub fn add_listener(
        &mut self,
        descriptor: &MessageDescriptor<M>,
        handler: impl FnMut(&SessionEvent<M>) + 'static,
    ) -> ListenerId {
        self.events.subscribe(EventKind::Push(descriptor.name), handler)
    }

    pub fn remove_listener(&mut self, descriptor: &MessageDescriptor<M>, id: ListenerId) -> bool {
        self.events.unsubscribe(EventKind::Push(descriptor.name), id)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    pub fn calls_in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Server time minus local time, smoothed via half the round trip.
    pub fn server_clock_offset_ms(&self) -> i64 {
        self.server_clock_offset_ms
    }

    /// Last measured round-trip delay.
    pub fn net_delay_ms(&self) -> u64 {
        self.net_delay_ms
    }

    pub fn server_time_ms(&self) -> i64 {
        self.clock.unix_millis() as i64 + self.server_clock_offset_ms
    }

    pub fn server_time_sec(&self) -> i64 {
        self.server_time_ms() / 1000
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn force_seq_counter(&mut self, value: u16) {
        self.seq_counter = value;
    }

    #[cfg(test)]
    pub(crate) fn keep_alive_len(&self) -> usize {
        self.keep_alive.len()
    }
}
