//! Shared fixtures for the crate's tests: a small message schema, a scripted transport
//!  and a manually advanced clock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::bail;

use crate::buffer::ByteBuf;
use crate::buffer_pool::BufferPool;
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::engine::SessionEngine;
use crate::events::SessionEvent;
use crate::schema::{MessageDescriptor, ReservedMessages, SchemaTable};
use crate::transport::{Frame, Transport};

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum TestMsg {
    Heart,
    HeartAck { now_ms: u64 },
    Success,
    Failure { ecode: u32 },
    Login { token: String },
    LoginAck { player_id: u32 },
    ChatPush { text: String },
}

pub const CMD_HEART_C2S: u16 = 1;
pub const CMD_HEART_S2C: u16 = 2;
pub const CMD_SUCCESS_S2C: u16 = 3;
pub const CMD_FAILURE_S2C: u16 = 4;
pub const CMD_LOGIN_C2S: u16 = 10;
pub const CMD_LOGIN_ACK_S2C: u16 = 11;
pub const CMD_CHAT_S2C: u16 = 12;

fn encode_empty(_: &TestMsg, _: &mut ByteBuf) -> anyhow::Result<()> {
    Ok(())
}

fn decode_heart(_: &mut ByteBuf) -> anyhow::Result<TestMsg> {
    Ok(TestMsg::Heart)
}

fn encode_heart_ack(msg: &TestMsg, buf: &mut ByteBuf) -> anyhow::Result<()> {
    match msg {
        TestMsg::HeartAck { now_ms } => {
            buf.write_u64(*now_ms);
            Ok(())
        }
        _ => bail!("not a heartbeat ack"),
    }
}

fn decode_heart_ack(buf: &mut ByteBuf) -> anyhow::Result<TestMsg> {
    Ok(TestMsg::HeartAck {
        now_ms: buf.read_u64()?,
    })
}

fn decode_success(_: &mut ByteBuf) -> anyhow::Result<TestMsg> {
    Ok(TestMsg::Success)
}

fn encode_failure(msg: &TestMsg, buf: &mut ByteBuf) -> anyhow::Result<()> {
    match msg {
        TestMsg::Failure { ecode } => {
            buf.write_u32(*ecode);
            Ok(())
        }
        _ => bail!("not a failure"),
    }
}

fn decode_failure(buf: &mut ByteBuf) -> anyhow::Result<TestMsg> {
    Ok(TestMsg::Failure {
        ecode: buf.read_u32()?,
    })
}

fn encode_login(msg: &TestMsg, buf: &mut ByteBuf) -> anyhow::Result<()> {
    match msg {
        TestMsg::Login { token } => buf.write_utf(token),
        _ => bail!("not a login"),
    }
}

fn decode_login(buf: &mut ByteBuf) -> anyhow::Result<TestMsg> {
    Ok(TestMsg::Login {
        token: buf.read_utf()?,
    })
}

fn encode_login_ack(msg: &TestMsg, buf: &mut ByteBuf) -> anyhow::Result<()> {
    match msg {
        TestMsg::LoginAck { player_id } => {
            buf.write_u32(*player_id);
            Ok(())
        }
        _ => bail!("not a login ack"),
    }
}

fn decode_login_ack(buf: &mut ByteBuf) -> anyhow::Result<TestMsg> {
    Ok(TestMsg::LoginAck {
        player_id: buf.read_u32()?,
    })
}

fn encode_chat(msg: &TestMsg, buf: &mut ByteBuf) -> anyhow::Result<()> {
    match msg {
        TestMsg::ChatPush { text } => buf.write_utf(text),
        _ => bail!("not a chat push"),
    }
}

fn decode_chat(buf: &mut ByteBuf) -> anyhow::Result<TestMsg> {
    Ok(TestMsg::ChatPush {
        text: buf.read_utf()?,
    })
}

fn failure_ecode(msg: &TestMsg) -> Option<u32> {
    match msg {
        TestMsg::Failure { ecode } => Some(*ecode),
        _ => None,
    }
}

fn heartbeat_now_ms(msg: &TestMsg) -> Option<u64> {
    match msg {
        TestMsg::HeartAck { now_ms } => Some(*now_ms),
        _ => None,
    }
}

fn new_heartbeat() -> TestMsg {
    TestMsg::Heart
}

pub const HEART_C2S: MessageDescriptor<TestMsg> = MessageDescriptor {
    name: "net_heart_c2s",
    cmd: CMD_HEART_C2S,
    encode: encode_empty,
    decode: decode_heart,
};

pub const HEART_S2C: MessageDescriptor<TestMsg> = MessageDescriptor {
    name: "net_heart_s2c",
    cmd: CMD_HEART_S2C,
    encode: encode_heart_ack,
    decode: decode_heart_ack,
};

pub const SUCCESS_S2C: MessageDescriptor<TestMsg> = MessageDescriptor {
    name: "success_s2c",
    cmd: CMD_SUCCESS_S2C,
    encode: encode_empty,
    decode: decode_success,
};

pub const FAILURE_S2C: MessageDescriptor<TestMsg> = MessageDescriptor {
    name: "failure_s2c",
    cmd: CMD_FAILURE_S2C,
    encode: encode_failure,
    decode: decode_failure,
};

pub const LOGIN_C2S: MessageDescriptor<TestMsg> = MessageDescriptor {
    name: "login_c2s",
    cmd: CMD_LOGIN_C2S,
    encode: encode_login,
    decode: decode_login,
};

pub const LOGIN_ACK_S2C: MessageDescriptor<TestMsg> = MessageDescriptor {
    name: "login_ack_s2c",
    cmd: CMD_LOGIN_ACK_S2C,
    encode: encode_login_ack,
    decode: decode_login_ack,
};

pub const CHAT_S2C: MessageDescriptor<TestMsg> = MessageDescriptor {
    name: "chat_s2c",
    cmd: CMD_CHAT_S2C,
    encode: encode_chat,
    decode: decode_chat,
};

pub fn test_schema() -> SchemaTable<TestMsg> {
    let mut table = SchemaTable::new(ReservedMessages {
        heartbeat_c2s: HEART_C2S,
        heartbeat_s2c: HEART_S2C,
        generic_success: SUCCESS_S2C,
        generic_failure: FAILURE_S2C,
        failure_ecode,
        heartbeat_now_ms,
        new_heartbeat,
    })
    .unwrap();

    table.register(LOGIN_C2S).unwrap();
    table.register(LOGIN_ACK_S2C).unwrap();
    table.register(CHAT_S2C).unwrap();
    table
}

/// Everything the scripted transport records, plus the `connected` flag a test flips to
///  script socket availability.
#[derive(Default)]
pub struct TransportLog {
    pub connected: bool,
    /// (seq, cmd, payload) per outbound frame.
    pub sent: Vec<(u16, u16, Vec<u8>)>,
    pub init_addresses: Vec<String>,
    pub connect_calls: u32,
    pub reset_calls: u32,
    pub paused: bool,
}

pub struct ScriptedTransport {
    shared: Arc<Mutex<TransportLog>>,
}

impl ScriptedTransport {
    pub fn new() -> (ScriptedTransport, Arc<Mutex<TransportLog>>) {
        let shared = Arc::new(Mutex::new(TransportLog::default()));
        (
            ScriptedTransport {
                shared: shared.clone(),
            },
            shared,
        )
    }
}

impl Transport for ScriptedTransport {
    fn init(&mut self, address: &str) {
        self.shared
            .lock()
            .unwrap()
            .init_addresses
            .push(address.to_string());
    }

    fn connect(&mut self) {
        // completion stays under test control via the `connected` flag
        self.shared.lock().unwrap().connect_calls += 1;
    }

    fn send(&mut self, seq: u16, cmd: u16, payload: &[u8]) {
        self.shared
            .lock()
            .unwrap()
            .sent
            .push((seq, cmd, payload.to_vec()));
    }

    fn connected(&self) -> bool {
        self.shared.lock().unwrap().connected
    }

    fn reset(&mut self) {
        let mut log = self.shared.lock().unwrap();
        log.reset_calls += 1;
        log.connected = false;
    }

    fn pause(&mut self) {
        self.shared.lock().unwrap().paused = true;
    }

    fn resume(&mut self) {
        self.shared.lock().unwrap().paused = false;
    }
}

/// Clock that only moves when a test calls [ManualClock::advance]. Clones share the
///  same timeline.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    elapsed_ms: Arc<Mutex<u64>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            base: Instant::now(),
            elapsed_ms: Arc::new(Mutex::new(0)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed_ms.lock().unwrap() += duration.as_millis() as u64;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(*self.elapsed_ms.lock().unwrap())
    }

    fn unix_millis(&self) -> u64 {
        1_700_000_000_000 + *self.elapsed_ms.lock().unwrap()
    }
}

/// A fully wired engine over the scripted transport and manual clock.
pub fn test_engine() -> (
    SessionEngine<TestMsg>,
    Arc<Mutex<TransportLog>>,
    ManualClock,
    Arc<BufferPool>,
) {
    let (transport, log) = ScriptedTransport::new();
    let clock = ManualClock::new();
    let pool = Arc::new(BufferPool::new(64, 16));
    let engine = SessionEngine::new(
        test_schema(),
        Box::new(transport),
        Box::new(clock.clone()),
        pool.clone(),
        SessionConfig::default(),
    )
    .unwrap();
    (engine, log, clock, pool)
}

/// Builds an inbound frame the way a transport would: encoded body in a pooled buffer,
///  cursor rewound for the decoder.
pub fn inbound_frame(
    pool: &BufferPool,
    schema: &SchemaTable<TestMsg>,
    cmd: u16,
    seq: u16,
    msg: &TestMsg,
) -> Frame {
    let mut buf = pool.get();
    let descriptor = schema.descriptor(cmd).unwrap();
    (descriptor.encode)(msg, &mut buf).unwrap();
    buf.set_position(0);
    Frame { cmd, seq, buf }
}

/// Subscribes a recorder to the given event kinds; each delivery is pushed as the
///  event's debug rendering.
pub fn record_events(
    engine: &mut SessionEngine<TestMsg>,
    kinds: &[crate::events::EventKind],
) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for &kind in kinds {
        let l = log.clone();
        engine.subscribe(kind, move |evt: &SessionEvent<TestMsg>| {
            l.lock().unwrap().push(format!("{:?}", evt));
        });
    }
    log
}
