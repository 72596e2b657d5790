pub mod orchestrator;
pub mod textgen;
pub mod warmup;
