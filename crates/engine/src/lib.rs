pub mod checkworthy;
pub mod circuit_breaker;
pub mod config;
pub mod coref;
pub mod decompose;
pub mod embeddings;
pub mod fanout;
pub mod llm;
pub mod orchestrator;
pub mod query_gen;
pub mod queue;
pub mod retrieval;
pub mod retry;
pub mod screening;
pub mod store;
pub mod verdicts;
pub mod verify;
