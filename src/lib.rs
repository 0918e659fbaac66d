pub mod buffer;
pub mod buffer_pool;
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod schema;
pub mod transport;
pub mod util;

#[cfg(test)]
pub mod test_util;
