//! Step ordering graph using `petgraph`.
//!
//! Nodes are plan steps; an edge points from a step that provides something
//! (a tool binary, the dependency manifest, OS packages) to a step that
//! needs it. A plan is correctly ordered when every edge points forward.

use std::fmt;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use strata_common::constants::{LOCKFILE_FILE, MANIFEST_FILE};
use strata_common::error::{Result, StrataError};

use crate::plan::{PlannedStep, StepKind};

/// Why one step must precede another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// The consumer invokes a tool the provider installs.
    Tool(String),
    /// The consumer synchronizes dependencies from a manifest the provider
    /// copies into this directory.
    Manifest(String),
    /// OS packages installed by the provider may be needed by synchronization.
    Packages,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool(name) => write!(f, "tool `{name}`"),
            Self::Manifest(dir) => write!(f, "{MANIFEST_FILE} in {dir}"),
            Self::Packages => write!(f, "OS packages"),
        }
    }
}

/// An edge that points backwards in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Index of the providing step.
    pub provider: usize,
    /// Index of the step that needs it.
    pub consumer: usize,
    /// What is provided.
    pub requirement: Requirement,
}

/// A dependency graph over plan steps.
#[derive(Debug)]
pub struct StepGraph {
    graph: DiGraph<usize, Requirement>,
    nodes: Vec<NodeIndex>,
}

impl StepGraph {
    /// Creates a graph with one node per step and no edges.
    #[must_use]
    pub fn new(step_count: usize) -> Self {
        let mut graph = DiGraph::new();
        let nodes = (0..step_count).map(|i| graph.add_node(i)).collect();
        Self { graph, nodes }
    }

    /// Builds the requirement graph of a plan.
    #[must_use]
    pub fn from_steps(steps: &[PlannedStep]) -> Self {
        let mut g = Self::new(steps.len());

        for consumer in steps {
            for tool in &consumer.tools {
                let providers: Vec<usize> = steps
                    .iter()
                    .filter(|p| p.index != consumer.index && p.provides().contains(tool))
                    .map(|p| p.index)
                    .collect();
                if let Some(provider) = nearest_provider(&providers, consumer.index) {
                    g.add_requirement(provider, consumer.index, Requirement::Tool(tool.clone()));
                }
            }

            if matches!(consumer.kind, StepKind::LockedSync { .. }) {
                let providers: Vec<usize> = steps
                    .iter()
                    .filter(|p| delivers_manifest(p, &consumer.workdir))
                    .map(|p| p.index)
                    .collect();
                if let Some(provider) = nearest_provider(&providers, consumer.index) {
                    g.add_requirement(
                        provider,
                        consumer.index,
                        Requirement::Manifest(consumer.workdir.clone()),
                    );
                }
                for packages in steps
                    .iter()
                    .filter(|p| matches!(p.kind, StepKind::OsPackages { .. }))
                {
                    g.add_requirement(packages.index, consumer.index, Requirement::Packages);
                }
            }
        }
        g
    }

    /// Adds an edge: `consumer` needs what `provider` supplies.
    pub fn add_requirement(&mut self, provider: usize, consumer: usize, requirement: Requirement) {
        if let (Some(&from), Some(&to)) = (self.nodes.get(provider), self.nodes.get(consumer)) {
            let _ = self.graph.add_edge(from, to, requirement);
        }
    }

    /// Returns `true` if some step supplies the manifest `consumer` syncs from.
    #[must_use]
    pub fn has_manifest_provider(&self, consumer: usize) -> bool {
        self.nodes.get(consumer).is_some_and(|&node| {
            self.graph
                .edges_directed(node, Direction::Incoming)
                .any(|e| matches!(e.weight(), Requirement::Manifest(_)))
        })
    }

    /// Edges whose provider does not come before the consumer.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        let mut out: Vec<Violation> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                let provider = *self.graph.node_weight(from)?;
                let consumer = *self.graph.node_weight(to)?;
                (provider >= consumer).then(|| Violation {
                    provider,
                    consumer,
                    requirement: self.graph[e].clone(),
                })
            })
            .collect();
        out.sort_by_key(|v| (v.consumer, v.provider));
        out
    }

    /// Returns an order of step indices in which every provider precedes
    /// its consumers.
    ///
    /// # Errors
    ///
    /// Returns an error if the requirements are cyclic.
    pub fn resolve_order(&self) -> Result<Vec<usize>> {
        match petgraph::algo::toposort(&self.graph, None) {
            Ok(indices) => Ok(indices
                .iter()
                .filter_map(|&idx| self.graph.node_weight(idx).copied())
                .collect()),
            Err(_cycle) => Err(StrataError::Config {
                message: "cyclic requirement detected between build steps".into(),
            }),
        }
    }
}

/// The last provider before `consumer`, or else the first one after it.
fn nearest_provider(providers: &[usize], consumer: usize) -> Option<usize> {
    providers
        .iter()
        .copied()
        .filter(|&p| p < consumer)
        .max()
        .or_else(|| providers.iter().copied().find(|&p| p > consumer))
}

/// Whether a context copy places the dependency manifest in `dir`.
fn delivers_manifest(step: &PlannedStep, dir: &str) -> bool {
    let StepKind::CopyContext { sources, dest } = &step.kind else {
        return false;
    };
    let dest_dir = dest.trim_end_matches('/');
    let dest_dir = if dest_dir.is_empty() { "/" } else { dest_dir };
    let whole_tree = sources
        .iter()
        .any(|s| matches!(s.trim_end_matches('/'), "." | ""));
    let manifest_file = sources.iter().any(|s| {
        let name = s.rsplit('/').next().unwrap_or(s);
        name == MANIFEST_FILE || name == LOCKFILE_FILE
    });

    if whole_tree {
        dest_dir == dir
    } else if manifest_file {
        let into_dir = dest.ends_with('/') && dest_dir == dir;
        let as_file = sources.len() == 1
            && dest_dir == format!("{}/{MANIFEST_FILE}", dir.trim_end_matches('/'));
        into_dir || as_file
    } else {
        false
    }
}
