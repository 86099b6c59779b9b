// Test utilities - deterministic in-process engine for exercising the dispatcher

pub mod mock_engine;

pub use mock_engine::{MockConnection, MockEngine, MockStats};
