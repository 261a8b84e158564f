// src/job/model.rs

//! Hierarchical model tree describing a job's configuration.
//!
//! Only the lookups the dispatcher needs live here (find by kind, find by
//! name, walk). General tree editing is left to callers.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Well-known node kinds.
pub mod kinds {
    /// A runnable simulation.
    pub const SIMULATION: &str = "Simulation";
    /// Overrides subtree: its children replace same-named nodes elsewhere.
    pub const REPLACEMENTS: &str = "Replacements";
    /// Reference to the result sink a job reports into.
    pub const DATA_STORE: &str = "DataStore";
}

/// Handle to an in-process service attached to a node (a storage
/// connection, a locator, ...). Never serialized; stripped before a node
/// crosses the process boundary.
#[derive(Clone)]
pub struct ServiceRef(Arc<dyn Any + Send + Sync>);

impl ServiceRef {
    pub fn new<T: Any + Send + Sync>(service: T) -> Self {
        ServiceRef(Arc::new(service))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceRef(..)")
    }
}

/// One node of a model tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelNode {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ModelNode>,
    #[serde(skip)]
    pub services: Vec<ServiceRef>,
}

impl ModelNode {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_child(mut self, child: ModelNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_service(mut self, service: ServiceRef) -> Self {
        self.services.push(service);
        self
    }

    pub fn property(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key)
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Depth-first, pre-order walk over this node and all descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// First node (self included) of the given kind, depth-first.
    pub fn find_kind(&self, kind: &str) -> Option<&ModelNode> {
        self.walk().find(|n| n.is_kind(kind))
    }

    /// First node (self included) with the given name, depth-first.
    pub fn find_name(&self, name: &str) -> Option<&ModelNode> {
        self.walk().find(|n| n.name == name)
    }

    pub fn has_child_kind(&self, kind: &str) -> bool {
        self.children.iter().any(|c| c.is_kind(kind))
    }

    pub fn node_count(&self) -> usize {
        self.walk().count()
    }

    /// Remove every in-process service reference in this subtree.
    pub fn strip_services(&mut self) {
        self.services.clear();
        for child in &mut self.children {
            child.strip_services();
        }
    }

    pub fn has_services(&self) -> bool {
        self.walk().any(|n| !n.services.is_empty())
    }

    /// Replace every descendant whose name matches `replacement.name` (and
    /// which is not a replacements container itself) with a clone of
    /// `replacement`. Returns how many nodes were replaced.
    pub fn replace_named(&mut self, replacement: &ModelNode) -> usize {
        let mut replaced = 0;
        for child in &mut self.children {
            if child.is_kind(kinds::REPLACEMENTS) {
                continue;
            }
            if child.name == replacement.name {
                *child = replacement.clone();
                replaced += 1;
            } else {
                replaced += child.replace_named(replacement);
            }
        }
        replaced
    }
}

/// Iterator returned by [`ModelNode::walk`].
pub struct Walk<'a> {
    stack: Vec<&'a ModelNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ModelNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tree() -> ModelNode {
        ModelNode::new("root", "Folder")
            .with_child(
                ModelNode::new("overrides", kinds::REPLACEMENTS)
                    .with_child(ModelNode::new("Weather", "Weather").with_property("file", json!("b.met"))),
            )
            .with_child(ModelNode::new("store", kinds::DATA_STORE))
            .with_child(
                ModelNode::new("sim", kinds::SIMULATION)
                    .with_child(ModelNode::new("Weather", "Weather").with_property("file", json!("a.met"))),
            )
    }

    #[test]
    fn walk_is_preorder() {
        let tree = sample_tree();
        let names: Vec<_> = tree.walk().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["root", "overrides", "Weather", "store", "sim", "Weather"]);
        assert_eq!(tree.node_count(), 6);
    }

    #[test]
    fn find_kind_and_name() {
        let tree = sample_tree();
        assert_eq!(tree.find_kind(kinds::DATA_STORE).unwrap().name, "store");
        assert_eq!(tree.find_name("sim").unwrap().kind, kinds::SIMULATION);
        assert!(tree.find_kind("Nope").is_none());
    }

    #[test]
    fn replace_named_skips_replacement_containers() {
        let mut tree = sample_tree();
        let replacement = ModelNode::new("Weather", "Weather").with_property("file", json!("c.met"));
        let replaced = tree.replace_named(&replacement);
        assert_eq!(replaced, 1);

        let sim = tree.find_name("sim").unwrap();
        assert_eq!(sim.children[0].property("file"), Some(&json!("c.met")));
        let overrides = tree.find_kind(kinds::REPLACEMENTS).unwrap();
        assert_eq!(overrides.children[0].property("file"), Some(&json!("b.met")));
    }

    #[test]
    fn services_are_not_serialized_and_can_be_stripped() {
        let mut node = ModelNode::new("sim", kinds::SIMULATION)
            .with_service(ServiceRef::new(42u32))
            .with_child(ModelNode::new("child", "Thing").with_service(ServiceRef::new("svc")));
        assert!(node.has_services());
        assert_eq!(node.services[0].downcast_ref::<u32>(), Some(&42));

        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("services").is_none());

        node.strip_services();
        assert!(!node.has_services());
    }
}
