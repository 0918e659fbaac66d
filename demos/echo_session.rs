use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use tracing::{info, Level};

use gamelink::buffer::ByteBuf;
use gamelink::buffer_pool::BufferPool;
use gamelink::clock::SystemClock;
use gamelink::config::SessionConfig;
use gamelink::engine::SessionEngine;
use gamelink::events::{EventKind, SessionEvent};
use gamelink::schema::{MessageDescriptor, ReservedMessages, SchemaTable};
use gamelink::transport::{Frame, Transport};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        // .with_max_level(Level::TRACE)
        .try_init()
        .ok();
}

#[derive(Clone, Debug)]
enum Msg {
    Heart,
    HeartAck { now_ms: u64 },
    Ok,
    Fail { ecode: u32 },
    Echo { text: String },
    EchoAck { text: String },
}

const HEART_C2S: MessageDescriptor<Msg> = MessageDescriptor {
    name: "net_heart_c2s",
    cmd: 1,
    encode: |_, _| Ok(()),
    decode: |_| Ok(Msg::Heart),
};
const HEART_S2C: MessageDescriptor<Msg> = MessageDescriptor {
    name: "net_heart_s2c",
    cmd: 2,
    encode: |msg, buf| match msg {
        Msg::HeartAck { now_ms } => {
            buf.write_u64(*now_ms);
            Ok(())
        }
        _ => bail!("not a heartbeat ack"),
    },
    decode: |buf| Ok(Msg::HeartAck { now_ms: buf.read_u64()? }),
};
const OK_S2C: MessageDescriptor<Msg> = MessageDescriptor {
    name: "ok_s2c",
    cmd: 3,
    encode: |_, _| Ok(()),
    decode: |_| Ok(Msg::Ok),
};
const FAIL_S2C: MessageDescriptor<Msg> = MessageDescriptor {
    name: "fail_s2c",
    cmd: 4,
    encode: |msg, buf| match msg {
        Msg::Fail { ecode } => {
            buf.write_u32(*ecode);
            Ok(())
        }
        _ => bail!("not a failure"),
    },
    decode: |buf| Ok(Msg::Fail { ecode: buf.read_u32()? }),
};
const ECHO_C2S: MessageDescriptor<Msg> = MessageDescriptor {
    name: "echo_c2s",
    cmd: 10,
    encode: |msg, buf| match msg {
        Msg::Echo { text } => buf.write_utf(text),
        _ => bail!("not an echo request"),
    },
    decode: |buf| Ok(Msg::Echo { text: buf.read_utf()? }),
};
const ECHO_ACK_S2C: MessageDescriptor<Msg> = MessageDescriptor {
    name: "echo_ack_s2c",
    cmd: 11,
    encode: |msg, buf| match msg {
        Msg::EchoAck { text } => buf.write_utf(text),
        _ => bail!("not an echo ack"),
    },
    decode: |buf| Ok(Msg::EchoAck { text: buf.read_utf()? }),
};

fn schema() -> anyhow::Result<SchemaTable<Msg>> {
    let mut table = SchemaTable::new(ReservedMessages {
        heartbeat_c2s: HEART_C2S,
        heartbeat_s2c: HEART_S2C,
        generic_success: OK_S2C,
        generic_failure: FAIL_S2C,
        failure_ecode: |msg| match msg {
            Msg::Fail { ecode } => Some(*ecode),
            _ => None,
        },
        heartbeat_now_ms: |msg| match msg {
            Msg::HeartAck { now_ms } => Some(*now_ms),
            _ => None,
        },
        new_heartbeat: || Msg::Heart,
    })?;
    table.register(ECHO_C2S)?;
    table.register(ECHO_ACK_S2C)?;
    Ok(table)
}

/// In-process stand-in for a socket: outbound frames land in a queue the "server" loop
///  below answers from.
struct LoopbackTransport {
    outbound: Arc<Mutex<VecDeque<(u16, u16, Vec<u8>)>>>,
    connected: bool,
}

impl Transport for LoopbackTransport {
    fn init(&mut self, address: &str) {
        info!("loopback transport bound to {}", address);
    }

    fn connect(&mut self) {
        self.connected = true;
    }

    fn send(&mut self, seq: u16, cmd: u16, payload: &[u8]) {
        self.outbound.lock().unwrap().push_back((seq, cmd, payload.to_vec()));
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) {
        self.connected = false;
    }

    fn pause(&mut self) {}

    fn resume(&mut self) {}
}

/// Answers the engine's outbound frames the way a trivial game server would.
fn answer(engine: &mut SessionEngine<Msg>, pool: &BufferPool, seq: u16, cmd: u16, payload: &[u8]) {
    let reply = match cmd {
        c if c == HEART_C2S.cmd => Some((
            HEART_S2C,
            Msg::HeartAck {
                now_ms: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
            },
        )),
        c if c == ECHO_C2S.cmd => {
            let mut buf = ByteBuf::from_slice(payload, 64);
            let text = buf.read_utf().unwrap_or_default();
            Some((ECHO_ACK_S2C, Msg::EchoAck { text }))
        }
        _ => None,
    };

    if let Some((descriptor, msg)) = reply {
        let mut buf = pool.get();
        if (descriptor.encode)(&msg, &mut buf).is_ok() {
            buf.set_position(0);
            engine.on_frame(Frame { cmd: descriptor.cmd, seq, buf });
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_logging();

    let outbound = Arc::new(Mutex::new(VecDeque::new()));
    let pool = Arc::new(BufferPool::new(1024, 32));
    let mut engine = SessionEngine::new(
        schema()?,
        Box::new(LoopbackTransport {
            outbound: outbound.clone(),
            connected: false,
        }),
        Box::new(SystemClock),
        pool.clone(),
        SessionConfig::default(),
    )?;

    engine.subscribe(EventKind::Connect, |_| info!("session up"));
    engine.subscribe(EventKind::Busy, |evt| {
        if let SessionEvent::Busy { active } = evt {
            info!("busy indicator: {}", active);
        }
    });

    engine.init("loopback://echo");
    engine.on_connect();

    engine.call(&ECHO_C2S, &Msg::Echo { text: "hello 🦀".to_string() }, |reply| {
        match reply {
            Ok(envelope) => info!("echo reply: {:?}", envelope.msg),
            Err(ecode) => info!("echo failed with ecode {}", ecode),
        }
    })?;
    engine.sync_server_time(Some(Box::new(|result| {
        info!("server time sync: {:?}", result);
    })))?;

    let sweep = engine.config().sweep_interval;
    for _ in 0..8 {
        tokio::time::sleep(sweep).await;
        engine.tick();

        let frames = outbound.lock().unwrap().drain(..).collect::<Vec<_>>();
        for (seq, cmd, payload) in frames {
            answer(&mut engine, &pool, seq, cmd, &payload);
        }
    }

    info!(
        "server clock offset {}ms, rtt {}ms",
        engine.server_clock_offset_ms(),
        engine.net_delay_ms()
    );
    engine.dispose();
    Ok(())
}
