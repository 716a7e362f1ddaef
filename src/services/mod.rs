pub mod composite;
pub mod encryption;
pub mod fallback;
pub mod generation;
pub mod input_validator;
pub mod jobs;
pub mod orchestrator;
pub mod prompt_policy;
pub mod provenance;
pub mod storage;
pub mod video;
