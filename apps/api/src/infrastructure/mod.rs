// Infrastructure layer module
// Contains database adapters and external service integrations

pub mod llm;
pub mod repositories;
