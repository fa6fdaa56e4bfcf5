//! Explicit parameter store with a session lifecycle, plus built-in dynamic
//! values.
pub mod builtins;
mod session;
mod store;

#[cfg(test)]
mod tests;

pub use session::Session;
pub use store::ParameterStore;
