//! Dependency graph of the configured services.

use std::collections::HashMap;

use crate::config::{NormalizedConfig, ServiceId};

/// Directed acyclic graph over service ids.
///
/// An edge `a → b` means `a` waits for `b`. The graph built from a config
/// points from each service to its dependencies; `reversed()` points from
/// each service to its dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    order: Vec<ServiceId>,
    edges: HashMap<ServiceId, Vec<ServiceId>>,
    reverse: HashMap<ServiceId, Vec<ServiceId>>,
}

impl DependencyGraph {
    /// Build the graph of a validated config.
    pub fn from_config(config: &NormalizedConfig) -> Self {
        Self::from_edges(
            config
                .services
                .iter()
                .map(|service| (service.id.clone(), service.dependencies.clone())),
        )
    }

    /// Build a graph from `(id, waits_for)` pairs in declaration order.
    /// Every referenced id must also be declared.
    pub fn from_edges(nodes: impl IntoIterator<Item = (ServiceId, Vec<ServiceId>)>) -> Self {
        let mut order = Vec::new();
        let mut edges = HashMap::new();
        let mut reverse: HashMap<ServiceId, Vec<ServiceId>> = HashMap::new();

        for (id, waits_for) in nodes {
            reverse.entry(id.clone()).or_default();
            for target in &waits_for {
                reverse.entry(target.clone()).or_default().push(id.clone());
            }
            order.push(id.clone());
            edges.insert(id, waits_for);
        }

        Self {
            order,
            edges,
            reverse,
        }
    }

    /// The same nodes with every edge flipped.
    pub fn reversed(&self) -> Self {
        Self {
            order: self.order.clone(),
            edges: self.reverse.clone(),
            reverse: self.edges.clone(),
        }
    }

    /// Node ids in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// What `id` waits for.
    pub fn waits_for(&self, id: &str) -> &[ServiceId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// What waits for `id`.
    pub fn waited_on_by(&self, id: &str) -> &[ServiceId] {
        self.reverse.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
