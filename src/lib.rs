//! # tot-core
//!
//! Reasoning-orchestration engine for Rust — drives a chat model through the
//! Tree-of-Thoughts method: expand a tree of partial thoughts, score them,
//! prune with a pluggable search strategy, and synthesize a final answer.
//! Runs are spawned in the background, polled for status, and cancellable
//! at any suspension point.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tot_core::cache::SemanticCache;
//! use tot_core::engine::RunEngine;
//! use tot_core::gateway::{GeminiBackend, LlmGateway};
//! use tot_core::metrics;
//! use tot_core::registry::RunRegistry;
//! use tot_core::types::{RunConfig, Task};
//!
//! # async fn example() -> tot_core::TotResult<()> {
//! let sink = metrics::noop();
//! let backend = Arc::new(GeminiBackend::new(std::env::var("GEMINI_API_KEY").unwrap()));
//! let gateway = Arc::new(LlmGateway::new(backend, sink.clone()));
//! let config = RunConfig::default();
//! let cache = Arc::new(SemanticCache::new(
//!     gateway.clone(),
//!     sink.clone(),
//!     config.embedding_model.clone(),
//!     config.embedding_dim,
//!     config.cache,
//! ));
//! let registry = RunRegistry::new(Arc::new(RunEngine::new(gateway, cache, sink)));
//!
//! let task = Task::new("Use the numbers 4, 6, 7, 8 to make 24 with +, -, *, /");
//! let run_id = registry.start(task, config)?;
//!
//! let status = registry.status(&run_id).await?;
//! println!("{}: {}", run_id, status.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Core types: `Task`, `RunConfig`, `ValueScore`, `RunStatus`, `StopReason` |
//! | [`gateway`] | Uniform chat/embed interface with retries, timeouts and cancellation |
//! | [`cache`] | Process-wide semantic cache: cosine-matched, FIFO-evicted, namespace-split |
//! | [`graph`] | Per-run thought tree with path reconstruction |
//! | [`strategy`] | Pluggable frontier policies: beam search, best-first search |
//! | [`engine`] | The expand → evaluate → select → stop state machine plus proposer, evaluator, finalizer |
//! | [`registry`] | Process-wide run lifecycle: start, status, trace, cancel, list |
//! | [`prompts`] | Injectable propose/value/finalize templates |
//! | [`metrics`] | Best-effort counter/observation sink |
//! | [`config`] | Tolerant JSON config loading |
//! | [`error`] | Error types with thiserror: config, LLM, parse, cancellation, internal |

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod metrics;
pub mod prompts;
pub mod registry;
pub mod strategy;
pub mod types;

pub use error::{TotError, TotResult};
pub use types::*;
