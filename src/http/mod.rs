//! `reqwest`-backed dispatch for step chains and weighted load runs.
mod client;
mod dispatcher;
mod mix;
mod request;


pub use client::{HttpClientConfig, build_client};
pub use dispatcher::{HttpDispatcher, HttpTaskFactory};
pub use mix::{RequestMix, WeightedRequest};
pub use request::RequestTemplate;
