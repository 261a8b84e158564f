// src/job/provider.rs

//! Job providers: the external collaborators that enumerate jobs.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value as JsonValue, json};
use tracing::debug;

use super::model::{ModelNode, kinds};
use super::{ModelJob, Runnable};
use crate::config::model::{JobConfig, ProviderConfig};
use crate::errors::Result;
use crate::sink::ResultSink;

/// A job as yielded by a provider, before the source assigns its identity.
#[derive(Clone)]
pub struct ProvidedJob {
    pub name: String,
    pub runnable: Runnable,
    pub sink: Option<Arc<dyn ResultSink>>,
}

impl ProvidedJob {
    pub fn new(name: impl Into<String>, runnable: Runnable) -> Self {
        Self {
            name: name.into(),
            runnable,
            sink: None,
        }
    }
}

/// Anything that can enumerate jobs to run.
pub trait JobProvider: Send + Sync {
    fn name(&self) -> &str;

    fn jobs(&self) -> Box<dyn Iterator<Item = ProvidedJob> + Send + '_>;
}

/// Provider over a fixed, in-memory list of jobs.
pub struct StaticProvider {
    name: String,
    jobs: Vec<ProvidedJob>,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: ProvidedJob) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// One model job per `Simulation` node in `tree`; each job keeps a
    /// shared handle on the whole tree so materialization can find the
    /// overrides subtree and the result-sink reference.
    pub fn with_tree(mut self, tree: ModelNode) -> Self {
        let tree = Arc::new(tree);
        let sims: Vec<ModelNode> = tree
            .walk()
            .filter(|n| n.is_kind(kinds::SIMULATION))
            .cloned()
            .collect();
        for node in sims {
            let name = node.name.clone();
            self.jobs.push(ProvidedJob::new(
                name,
                Runnable::Model(ModelJob {
                    node,
                    tree: Some(Arc::clone(&tree)),
                }),
            ));
        }
        self
    }

    /// Build a provider from a validated `[[provider]]` section.
    ///
    /// `base_dir` resolves a relative `tree` path; `sink` is attached to
    /// every job the provider yields.
    pub fn from_config(
        cfg: &ProviderConfig,
        base_dir: &Path,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Result<Self> {
        let mut provider = StaticProvider::new(cfg.name.clone());

        if let Some(tree_path) = &cfg.tree {
            let path = base_dir.join(tree_path);
            let contents = std::fs::read_to_string(&path)?;
            let tree: ModelNode = serde_json::from_str(&contents)?;
            debug!(provider = %cfg.name, path = %path.display(), "loaded model tree");
            provider = provider.with_tree(tree);
        }

        for job in &cfg.job {
            provider.jobs.push(ProvidedJob::new(job.name.clone(), runnable_from_config(job)));
        }

        if let Some(sink) = sink {
            for job in &mut provider.jobs {
                job.sink = Some(Arc::clone(&sink));
            }
        }

        Ok(provider)
    }
}

fn runnable_from_config(job: &JobConfig) -> Runnable {
    if job.noop {
        return Runnable::Noop;
    }

    let mut node = ModelNode::new(job.name.clone(), kinds::SIMULATION)
        .with_property("steps", json!(job.steps))
        .with_property("step_ms", json!(job.step_ms));
    if let Some(cmd) = &job.command {
        node = node.with_property("command", JsonValue::String(cmd.clone()));
    }
    if let Some(msg) = &job.fail {
        node = node.with_property("fail", JsonValue::String(msg.clone()));
    }
    for (key, value) in &job.properties {
        node.properties.insert(key.clone(), value.clone());
    }

    Runnable::Model(ModelJob { node, tree: None })
}

impl JobProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn jobs(&self) -> Box<dyn Iterator<Item = ProvidedJob> + Send + '_> {
        Box::new(self.jobs.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_tree_yields_one_job_per_simulation() {
        let tree = ModelNode::new("root", "Folder")
            .with_child(ModelNode::new("a", kinds::SIMULATION))
            .with_child(
                ModelNode::new("folder", "Folder").with_child(ModelNode::new("b", kinds::SIMULATION)),
            )
            .with_child(ModelNode::new("store", kinds::DATA_STORE));

        let provider = StaticProvider::new("tree").with_tree(tree);
        let names: Vec<_> = provider.jobs().map(|j| j.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn config_job_properties_land_on_node() {
        let cfg = JobConfig {
            name: "j".into(),
            steps: 3,
            step_ms: 5,
            command: Some("echo hi".into()),
            fail: None,
            noop: false,
            properties: [("seed".to_string(), json!(9))].into_iter().collect(),
        };
        match runnable_from_config(&cfg) {
            Runnable::Model(job) => {
                assert_eq!(job.node.property("steps"), Some(&json!(3)));
                assert_eq!(job.node.property("command"), Some(&json!("echo hi")));
                assert_eq!(job.node.property("seed"), Some(&json!(9)));
                assert!(job.tree.is_none());
            }
            other => panic!("expected model job, got {other:?}"),
        }
    }

    #[test]
    fn noop_config_job_is_filler() {
        let cfg = JobConfig {
            name: "filler".into(),
            noop: true,
            ..JobConfig::default()
        };
        assert!(matches!(runnable_from_config(&cfg), Runnable::Noop));
    }
}
