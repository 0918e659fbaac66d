use anyhow::anyhow;
use rustc_hash::FxHashMap;

use crate::buffer::ByteBuf;

/// One entry of the declarative message schema: a wire `cmd` id plus the encode/decode
///  functions for the message body.
///
/// Descriptors are plain data (`Copy`), so an application typically declares them as
///  consts and passes references into [crate::engine::SessionEngine::call] /
///  [crate::engine::SessionEngine::send].
pub struct MessageDescriptor<M> {
    pub name: &'static str,
    pub cmd: u16,
    pub encode: fn(&M, &mut ByteBuf) -> anyhow::Result<()>,
    pub decode: fn(&mut ByteBuf) -> anyhow::Result<M>,
}

impl<M> Clone for MessageDescriptor<M> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<M> Copy for MessageDescriptor<M> {}

impl<M> std::fmt::Debug for MessageDescriptor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageDescriptor{{name:{}, cmd:{}}}", self.name, self.cmd)
    }
}

/// The reserved protocol entries every schema must provide: the keep-alive
///  request/response pair (`{now_ms}` on the response) and the platform-level generic
///  success / failure (`{ecode}`) sentinels.
pub struct ReservedMessages<M> {
    pub heartbeat_c2s: MessageDescriptor<M>,
    pub heartbeat_s2c: MessageDescriptor<M>,
    pub generic_success: MessageDescriptor<M>,
    pub generic_failure: MessageDescriptor<M>,

    /// Extracts the error code from a decoded generic-failure message.
    pub failure_ecode: fn(&M) -> Option<u32>,
    /// Extracts the server's epoch millis from a decoded heartbeat response.
    pub heartbeat_now_ms: fn(&M) -> Option<u64>,
    /// Builds a fresh heartbeat request body.
    pub new_heartbeat: fn() -> M,
}

/// Registry mapping `cmd` ids to message descriptors, built up front from the
///  application's schema plus the reserved entries.
pub struct SchemaTable<M> {
    by_cmd: FxHashMap<u16, MessageDescriptor<M>>,
    by_name: FxHashMap<&'static str, u16>,
    reserved: ReservedMessages<M>,
}

impl<M> SchemaTable<M> {
    pub fn new(reserved: ReservedMessages<M>) -> anyhow::Result<SchemaTable<M>> {
        let heartbeat_c2s = reserved.heartbeat_c2s;
        let heartbeat_s2c = reserved.heartbeat_s2c;
        let generic_success = reserved.generic_success;
        let generic_failure = reserved.generic_failure;

        let mut table = SchemaTable {
            by_cmd: FxHashMap::default(),
            by_name: FxHashMap::default(),
            reserved,
        };

        table.register(heartbeat_c2s)?;
        table.register(heartbeat_s2c)?;
        table.register(generic_success)?;
        table.register(generic_failure)?;
        Ok(table)
    }

    pub fn register(&mut self, descriptor: MessageDescriptor<M>) -> anyhow::Result<()> {
        if self.by_cmd.contains_key(&descriptor.cmd) {
            return Err(anyhow!(
                "registering a second descriptor for cmd {}",
                descriptor.cmd
            ));
        }
        if self.by_name.contains_key(descriptor.name) {
            return Err(anyhow!(
                "registering a second descriptor named {:?}",
                descriptor.name
            ));
        }

        self.by_name.insert(descriptor.name, descriptor.cmd);
        self.by_cmd.insert(descriptor.cmd, descriptor);
        Ok(())
    }

    pub fn descriptor(&self, cmd: u16) -> Option<&MessageDescriptor<M>> {
        self.by_cmd.get(&cmd)
    }

    pub fn descriptor_by_name(&self, name: &str) -> Option<&MessageDescriptor<M>> {
        self.by_name.get(name).and_then(|cmd| self.by_cmd.get(cmd))
    }

    pub fn name_of(&self, cmd: u16) -> Option<&'static str> {
        self.by_cmd.get(&cmd).map(|d| d.name)
    }

    pub fn heartbeat_c2s(&self) -> &MessageDescriptor<M> {
        &self.reserved.heartbeat_c2s
    }

    pub fn heartbeat_s2c(&self) -> &MessageDescriptor<M> {
        &self.reserved.heartbeat_s2c
    }

    pub fn generic_success(&self) -> &MessageDescriptor<M> {
        &self.reserved.generic_success
    }

    pub fn is_heartbeat_response(&self, cmd: u16) -> bool {
        cmd == self.reserved.heartbeat_s2c.cmd
    }

    pub fn is_generic_success(&self, cmd: u16) -> bool {
        cmd == self.reserved.generic_success.cmd
    }

    pub fn is_generic_failure(&self, cmd: u16) -> bool {
        cmd == self.reserved.generic_failure.cmd
    }

    pub fn failure_ecode(&self, msg: &M) -> Option<u32> {
        (self.reserved.failure_ecode)(msg)
    }

    pub fn heartbeat_now_ms(&self, msg: &M) -> Option<u64> {
        (self.reserved.heartbeat_now_ms)(msg)
    }

    pub fn new_heartbeat(&self) -> M {
        (self.reserved.new_heartbeat)()
    }
}
