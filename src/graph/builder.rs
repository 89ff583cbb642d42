//! Resource graph construction.
//!
//! The builder turns an ordered set of [`ResourceSpec`]s into a
//! [`ResourceGraph`]: every reference found in a spec's attributes becomes a
//! dependency edge, unknown targets are rejected, and a depth-first walk with
//! an on-stack marker rejects cycles while producing the topological order.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::{ExpandedStack, Settings};
use crate::error::{ConfigError, GraphError, Result};

use super::value::{Attr, Reference};

/// A desired resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    /// Logical name, unique within the graph.
    pub name: String,
    /// Resource kind understood by the provider.
    pub kind: String,
    /// Desired attributes.
    pub attributes: BTreeMap<String, Attr>,
}

impl ResourceSpec {
    /// Creates a spec with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds a desired attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Attr) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Returns the attributes in symbolic JSON form.
    #[must_use]
    pub fn symbolic_attributes(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_symbolic()))
                .collect::<Map<_, _>>(),
        )
    }

    /// Returns every (attribute, reference) pair.
    pub fn references(&self) -> impl Iterator<Item = (&str, &Reference)> {
        self.attributes
            .iter()
            .flat_map(|(key, attr)| attr.references().into_iter().map(move |r| (key.as_str(), r)))
    }
}

/// A spec together with the names it depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// The desired resource.
    pub spec: ResourceSpec,
    /// Logical names whose outputs this node reads.
    pub dependencies: BTreeSet<String>,
}

impl ResourceNode {
    /// Returns the logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// An acyclic graph of resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: HashMap<String, ResourceNode>,
    declared: Vec<String>,
    order: Vec<String>,
    groups: BTreeMap<String, Vec<String>>,
}

impl ResourceGraph {
    /// Returns a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    /// Returns true if the graph holds a node with this name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.declared.iter().filter_map(|name| self.nodes.get(name))
    }

    /// Names in topological order (dependencies first).
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Iterates nodes in topological order.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// Returns the names that depend directly on `name`, in declaration order.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.nodes()
            .filter(|node| node.dependencies.contains(name))
            .map(ResourceNode::name)
            .collect()
    }

    /// Expansion groups: declared name to member names.
    #[must_use]
    pub const fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    /// Returns the members of an expansion group.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }
}

/// DFS marker for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Builds resource graphs.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder that resolves `$config` lookups through `settings`.
    #[must_use]
    pub const fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Builds a graph from expanded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for missing settings, malformed attributes, unknown
    /// references, duplicate names, or cycles.
    pub fn build_stack(&self, stack: &ExpandedStack) -> Result<ResourceGraph> {
        self.settings.check_required()?;

        let specs = stack
            .resources
            .iter()
            .map(|resource| {
                let attributes = resource
                    .attributes
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), Attr::parse(value, &resource.name, self.settings)?)))
                    .collect::<Result<_>>()?;
                Ok(ResourceSpec {
                    name: resource.name.clone(),
                    kind: resource.kind.clone(),
                    attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut graph = self.build(specs)?;
        graph.groups.clone_from(&stack.groups);
        Ok(graph)
    }

    /// Builds a graph from an ordered set of specs.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown references, duplicate names, or cycles.
    pub fn build(&self, specs: Vec<ResourceSpec>) -> Result<ResourceGraph> {
        let mut declared = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateName {
                    resource_type: String::from("resource"),
                    name: spec.name.clone(),
                }
                .into());
            }
            declared.push(spec.name.clone());
        }

        let mut nodes = HashMap::with_capacity(specs.len());
        for spec in specs {
            let mut dependencies = BTreeSet::new();
            for (attribute, reference) in spec.references() {
                if !index.contains_key(&reference.resource) {
                    return Err(GraphError::UnknownReference {
                        resource: spec.name.clone(),
                        attribute: attribute.to_string(),
                        target: reference.resource.clone(),
                    }
                    .into());
                }
                dependencies.insert(reference.resource.clone());
            }
            nodes.insert(spec.name.clone(), ResourceNode { spec, dependencies });
        }

        let order = topological_sort(&nodes, &declared, &index)?;
        debug!("Built resource graph with {} nodes", order.len());

        Ok(ResourceGraph {
            nodes,
            declared,
            order,
            groups: BTreeMap::new(),
        })
    }
}

/// Orders nodes dependencies-first, visiting in declaration order.
fn topological_sort(
    nodes: &HashMap<String, ResourceNode>,
    declared: &[String],
    index: &HashMap<String, usize>,
) -> std::result::Result<Vec<String>, GraphError> {
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(nodes.len());
    let mut path: Vec<&str> = Vec::new();
    let mut order = Vec::with_capacity(nodes.len());

    for name in declared {
        visit(name, nodes, index, &mut marks, &mut path, &mut order)?;
    }

    Ok(order)
}

/// Pending dependencies of a node on the current path.
type Frame<'a> = (&'a str, std::vec::IntoIter<&'a str>);

/// Post-order walk from `root` on an explicit stack, so the depth of a
/// reference chain is bounded by memory rather than the thread stack.
fn visit<'a>(
    root: &'a str,
    nodes: &'a HashMap<String, ResourceNode>,
    index: &HashMap<String, usize>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> std::result::Result<(), GraphError> {
    let mut frames: Vec<Frame<'a>> = Vec::new();
    if let Some(frame) = enter(root, nodes, index, marks, path)? {
        frames.push(frame);
    }

    while let Some((name, pending)) = frames.last_mut() {
        match pending.next() {
            Some(dep) => {
                if let Some(frame) = enter(dep, nodes, index, marks, path)? {
                    frames.push(frame);
                }
            }
            None => {
                let name = *name;
                frames.pop();
                path.pop();
                marks.insert(name, Mark::Done);
                order.push(name.to_string());
            }
        }
    }

    Ok(())
}

/// Puts `name` on the current path and returns its dependencies in
/// declaration order. Returns `None` for finished or unknown nodes.
fn enter<'a>(
    name: &'a str,
    nodes: &'a HashMap<String, ResourceNode>,
    index: &HashMap<String, usize>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> std::result::Result<Option<Frame<'a>>, GraphError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(None),
        Some(Mark::OnStack) => {
            let start = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
            cycle.push(name.to_string());
            return Err(GraphError::CyclicDependency { cycle });
        }
        None => {}
    }

    let Some(node) = nodes.get(name) else {
        return Ok(None);
    };

    marks.insert(name, Mark::OnStack);
    path.push(name);

    let mut dependencies: Vec<&'a str> = node.dependencies.iter().map(String::as_str).collect();
    dependencies.sort_by_key(|dep| index.get(*dep).copied().unwrap_or(usize::MAX));
    Ok(Some((name, dependencies.into_iter())))
}
