//! Workflow orchestration core.
//!
//! ## Modules
//!
//! - [`engine`]: the fixed orchestration skeleton and the [`engine::Orchestrator`] trait
//! - [`beltalowda`]: hierarchical three-tier specialisation
//! - [`swarm`]: typed-swarm specialisation with keyword classification
//! - [`supervisor`]: workflow lifecycle owner (submit/cancel/status/shutdown)
//! - [`sink`]: event fan-out to the stream bus and webhook dispatcher
//! - [`render`]: document renderer plugin seam

pub mod beltalowda;
pub mod config;
pub mod engine;
pub mod error;
pub mod render;
pub mod sink;
pub mod supervisor;
pub mod swarm;

pub use beltalowda::BeltalowdaOrchestrator;
pub use config::{BeltalowdaConfig, EngineConfig, SwarmConfig};
pub use engine::{OrchestrationEngine, Orchestrator, WorkflowContext};
pub use error::{WorkflowError, WorkflowResult};
pub use render::{DocumentRenderer, RenderError};
pub use sink::EventSink;
pub use supervisor::{PatternInfo, SupervisorConfig, WebhookRequest, WorkflowSupervisor};
pub use swarm::{classify_query, SwarmOrchestrator};
