//! # noesis
//!
//! A sharded, multi-tenant cognitive runtime inspired by the OpenCog
//! AtomSpace. Knowledge lives in content-addressed atoms (nodes and links)
//! distributed across in-memory shards; a parallel inference engine chains
//! rules to a fixpoint; autonomous agents run on a priority schedule; and
//! staged pipelines compose the whole into cognitive workflows.
//!
//! ## Architecture
//!
//! - **Atom model** (`atom`): content-addressed nodes/links with truth and
//!   attention values
//! - **AtomSpace shard** (`space`): indexed store with a request-multiplexing
//!   worker pool
//! - **Shard manager** (`shard`): FNV-1a routing, parallel cross-shard
//!   queries, advisory rebalancing
//! - **Inference** (`infer`): per-tenant rule registry and fixpoint loop over
//!   a dispatch pool
//! - **Agents** (`agents`): priority-ticked executor with bounded run windows
//! - **Pipelines** (`pipeline`): sequential staged execution with per-stage
//!   timing
//! - **Façade** (`engine`): `CognitiveEngine`, the single public entry point
//!
//! ## Library usage
//!
//! ```no_run
//! use noesis::engine::{CognitiveEngine, Config};
//!
//! # async fn demo() -> noesis::error::NoesisResult<()> {
//! let engine = CognitiveEngine::new(Config::default())?;
//! engine.initialize_tenant("demo").await?;
//! let cat = engine.create_concept_node("Cat", "demo").await?;
//! let mammal = engine.create_concept_node("Mammal", "demo").await?;
//! engine
//!     .create_inheritance_link(cat.id(), mammal.id(), "demo")
//!     .await?;
//! let inferred = engine
//!     .run_inference("demo", 5, &noesis::infer::no_cancel())
//!     .await?;
//! # let _ = inferred;
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod atom;
pub mod engine;
pub mod error;
pub mod infer;
pub mod pattern;
pub mod pipeline;
pub mod shard;
pub mod space;
