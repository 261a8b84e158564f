// src/job/mod.rs

//! Jobs and where they come from.
//!
//! - [`model`] is the tree a job's configuration lives in.
//! - [`materialize`] turns a job into a transmission copy that can cross
//!   the process boundary.
//! - [`provider`] defines the job provider contract and the providers the
//!   CLI builds from config.
//! - [`source`] merges providers into one ordered stream.

pub mod materialize;
pub mod model;
pub mod provider;
pub mod source;

use std::fmt;
use std::sync::Arc;

use crate::sink::ResultSink;
use crate::types::JobId;

pub use materialize::materialize;
pub use model::{ModelNode, ServiceRef, kinds};
pub use provider::{JobProvider, ProvidedJob, StaticProvider};
pub use source::JobSource;

/// A pre-resolved simulation: a base tree plus replacement nodes that are
/// substituted by name when the standalone snapshot is realized.
#[derive(Debug, Clone)]
pub struct SimulationDescription {
    pub name: String,
    pub base: ModelNode,
    pub replacements: Vec<ModelNode>,
}

impl SimulationDescription {
    pub fn new(name: impl Into<String>, base: ModelNode) -> Self {
        Self {
            name: name.into(),
            base,
            replacements: Vec::new(),
        }
    }

    pub fn with_replacement(mut self, node: ModelNode) -> Self {
        self.replacements.push(node);
        self
    }

    /// Realize a standalone simulation snapshot. The snapshot carries no
    /// in-process services.
    pub fn to_simulation(&self) -> ModelNode {
        let mut sim = self.base.clone();
        sim.name = self.name.clone();
        for replacement in &self.replacements {
            sim.replace_named(replacement);
        }
        sim.strip_services();
        sim
    }
}

/// A runnable node that may live inside a larger model tree.
#[derive(Debug, Clone)]
pub struct ModelJob {
    pub node: ModelNode,
    pub tree: Option<Arc<ModelNode>>,
}

/// The unit a worker executes.
#[derive(Debug, Clone)]
pub enum Runnable {
    Simulation(SimulationDescription),
    Model(ModelJob),
    /// Internal filler job; executed like any other but never tracked in
    /// the progress registry.
    Noop,
}

/// One job, as owned by the dispatcher that drew it.
#[derive(Clone)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub provider: String,
    pub runnable: Runnable,
    pub sink: Option<Arc<dyn ResultSink>>,
}

impl Job {
    pub fn new(id: JobId, name: impl Into<String>, provider: impl Into<String>, runnable: Runnable) -> Self {
        Self {
            id,
            name: name.into(),
            provider: provider.into(),
            runnable,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.runnable, Runnable::Noop)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("runnable", &self.runnable)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
