pub mod config;
pub mod graph;
pub mod ingest;
pub mod orchestrator;
pub mod store;
pub mod tracing;

pub mod util {
    pub mod env;
}
