// Library exports for the binary, integration tests and benchmarks

// ===== Rule model =====
pub mod condition;
pub mod rule;
pub mod rule_tree;
pub mod template;

// ===== Loading =====
pub mod loader;
pub mod model;

// ===== Request handling =====
pub mod engine;
pub mod error;
pub mod hooks;
pub mod recording;
pub mod request;
pub mod response;
pub mod upstream;

// ===== Serving =====
pub mod config;
pub mod server;

pub use engine::{Collaborators, RuleEngine};
pub use error::{ConfigError, EngineError};
pub use model::{Port, RoutingModel, VirtualHost};
pub use request::NormalizedRequest;
pub use response::MockResponse;
