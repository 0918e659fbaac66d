#[cfg(test)]
use mockall::automock;

use crate::buffer::ByteBuf;

/// One unit delivered over the transport: schema `cmd`, correlation `seq` and the
///  encoded message body in a pooled buffer.
#[derive(Debug)]
pub struct Frame {
    pub cmd: u16,
    pub seq: u16,
    pub buf: ByteBuf,
}

/// The raw socket layer, consumed by the session engine.
///
/// The transport owns socket lifecycle and wire framing; the engine only sees
///  `{cmd, seq, payload}` units. Inbound traffic is not part of this trait - the
///  composition root forwards the transport's socket events into
///  [crate::engine::SessionEngine::on_connect] / `on_close` / `on_io_error` /
///  `on_frame`, keeping the engine single-threaded and free of callbacks into itself.
#[cfg_attr(test, automock)]
pub trait Transport {
    /// Configures the remote address for subsequent [Transport::connect] attempts.
    fn init(&mut self, address: &str);

    /// Starts an asynchronous connection attempt; completion is reported through the
    ///  `connect` socket event.
    fn connect(&mut self);

    fn send(&mut self, seq: u16, cmd: u16, payload: &[u8]);

    fn connected(&self) -> bool;

    /// Drops the current socket without reconnecting.
    fn reset(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);
}
