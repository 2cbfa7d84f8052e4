pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sse;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
