#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;

use jobfleet::config::{ConfigFile, JobConfig, ProviderConfig, RawConfigFile};
use jobfleet::job::provider::ProvidedJob;
use jobfleet::job::{JobProvider, JobSource, ModelJob, ModelNode, Runnable, StaticProvider, kinds};
use jobfleet::sink::ResultSink;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.pool.reap_strays = false;
        Self { config }
    }

    pub fn with_provider(mut self, name: &str, jobs: Vec<JobConfig>) -> Self {
        self.config.provider.push(ProviderConfig {
            name: name.to_string(),
            tree: None,
            job: jobs,
        });
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.pool.workers = Some(n);
        self
    }

    pub fn job_timeout(mut self, s: &str) -> Self {
        self.config.pool.job_timeout = Some(s.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            job: JobConfig {
                name: name.to_string(),
                ..JobConfig::default()
            },
        }
    }

    pub fn steps(mut self, n: u64) -> Self {
        self.job.steps = n;
        self
    }

    pub fn step_ms(mut self, ms: u64) -> Self {
        self.job.step_ms = ms;
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.job.command = Some(cmd.to_string());
        self
    }

    pub fn fail(mut self, msg: &str) -> Self {
        self.job.fail = Some(msg.to_string());
        self
    }

    pub fn noop(mut self) -> Self {
        self.job.noop = true;
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// A simulated job of `steps` instant steps.
pub fn sim_job(name: &str, steps: u64) -> ProvidedJob {
    sim_job_with(name, |node| node.with_property("steps", json!(steps)))
}

/// A simulated job that reports a per-job failure.
pub fn failing_job(name: &str, message: &str) -> ProvidedJob {
    sim_job_with(name, |node| node.with_property("fail", json!(message)))
}

/// A job that makes its worker exit with `code`.
pub fn crashing_job(name: &str, code: i32) -> ProvidedJob {
    sim_job_with(name, |node| {
        node.with_property("exit_code", json!(code))
            .with_property("fail", json!(format!("{name} brought its worker down")))
    })
}

/// A job that sleeps for `ms` in a single step.
pub fn slow_job(name: &str, ms: u64) -> ProvidedJob {
    sim_job_with(name, |node| {
        node.with_property("steps", json!(1)).with_property("step_ms", json!(ms))
    })
}

pub fn noop_job(name: &str) -> ProvidedJob {
    ProvidedJob::new(name, Runnable::Noop)
}

fn sim_job_with(name: &str, f: impl FnOnce(ModelNode) -> ModelNode) -> ProvidedJob {
    let node = f(ModelNode::new(name, kinds::SIMULATION));
    ProvidedJob::new(name, Runnable::Model(ModelJob { node, tree: None }))
}

/// Builder for an in-memory provider.
pub struct ProviderBuilder {
    provider: StaticProvider,
    sink: Option<Arc<dyn ResultSink>>,
}

impl ProviderBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            provider: StaticProvider::new(name),
            sink: None,
        }
    }

    pub fn job(mut self, job: ProvidedJob) -> Self {
        let job = match &self.sink {
            Some(sink) => ProvidedJob {
                sink: Some(Arc::clone(sink)),
                ..job
            },
            None => job,
        };
        self.provider = self.provider.with_job(job);
        self
    }

    /// Jobs added after this call deliver results to `sink`.
    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Arc<dyn JobProvider> {
        Arc::new(self.provider)
    }
}

/// A source over the given providers, in order.
pub fn source_of(providers: Vec<Arc<dyn JobProvider>>) -> JobSource {
    providers
        .into_iter()
        .fold(JobSource::new(), |source, p| source.with_provider(p))
}
