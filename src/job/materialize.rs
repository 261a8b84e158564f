// src/job/materialize.rs

//! Building the transmission copy of a job.

use tracing::trace;

use super::model::{ModelNode, kinds};
use super::{Job, Runnable};

/// Build a self-contained, serializable copy of `job` for a worker.
///
/// - Simulation descriptions realize a standalone snapshot.
/// - Model jobs are deep-cloned; when they belong to a tree, a clone of
///   the tree's overrides subtree and of its result-sink reference are
///   attached as children. Missing pieces are left out, and a piece the
///   runnable already carries as a direct child is not attached twice.
/// - Filler jobs become an empty node.
///
/// The returned node never carries in-process services.
pub fn materialize(job: &Job) -> ModelNode {
    let copy = match &job.runnable {
        Runnable::Simulation(desc) => desc.to_simulation(),
        Runnable::Model(model) => {
            let mut copy = model.node.clone();
            copy.strip_services();

            if let Some(tree) = model.tree.as_deref() {
                attach_from_tree(&mut copy, tree, kinds::REPLACEMENTS);
                attach_from_tree(&mut copy, tree, kinds::DATA_STORE);
            }
            copy
        }
        Runnable::Noop => ModelNode::new(job.name.clone(), "Noop"),
    };

    trace!(
        job = %job.id,
        nodes = copy.node_count(),
        children = copy.children.len(),
        "materialized transmission copy"
    );
    copy
}

fn attach_from_tree(copy: &mut ModelNode, tree: &ModelNode, kind: &str) {
    if copy.has_child_kind(kind) {
        return;
    }
    if let Some(found) = tree.find_kind(kind) {
        let mut child = found.clone();
        child.strip_services();
        copy.children.push(child);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::job::{ModelJob, ServiceRef};
    use crate::types::JobId;

    fn model_job(tree: Option<ModelNode>, node: ModelNode) -> Job {
        Job::new(
            JobId::new(1),
            node.name.clone(),
            "test",
            Runnable::Model(ModelJob {
                node,
                tree: tree.map(Arc::new),
            }),
        )
    }

    fn count_kind(node: &ModelNode, kind: &str) -> usize {
        node.children.iter().filter(|c| c.is_kind(kind)).count()
    }

    #[test]
    fn attaches_overrides_and_store_once() {
        let sim = ModelNode::new("sim", kinds::SIMULATION);
        let tree = ModelNode::new("root", "Folder")
            .with_child(ModelNode::new("overrides", kinds::REPLACEMENTS))
            .with_child(ModelNode::new("store", kinds::DATA_STORE).with_service(ServiceRef::new(7u8)))
            .with_child(sim.clone());

        let copy = materialize(&model_job(Some(tree), sim));
        assert_eq!(count_kind(&copy, kinds::REPLACEMENTS), 1);
        assert_eq!(count_kind(&copy, kinds::DATA_STORE), 1);
        assert!(!copy.has_services());
    }

    #[test]
    fn omits_missing_pieces() {
        let sim = ModelNode::new("sim", kinds::SIMULATION);
        let tree = ModelNode::new("root", "Folder").with_child(sim.clone());

        let copy = materialize(&model_job(Some(tree), sim));
        assert!(copy.children.is_empty());
    }

    #[test]
    fn does_not_duplicate_existing_child() {
        let sim = ModelNode::new("sim", kinds::SIMULATION)
            .with_child(ModelNode::new("local", kinds::REPLACEMENTS));
        let tree = ModelNode::new("root", "Folder")
            .with_child(ModelNode::new("global", kinds::REPLACEMENTS))
            .with_child(sim.clone());

        let copy = materialize(&model_job(Some(tree), sim));
        assert_eq!(count_kind(&copy, kinds::REPLACEMENTS), 1);
        assert_eq!(copy.children[0].name, "local");
    }

    #[test]
    fn job_without_tree_is_plain_clone() {
        let sim = ModelNode::new("sim", kinds::SIMULATION).with_service(ServiceRef::new(()));
        let copy = materialize(&model_job(None, sim));
        assert_eq!(copy.name, "sim");
        assert!(copy.children.is_empty());
        assert!(!copy.has_services());
    }
}
