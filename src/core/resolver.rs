//! Dependency resolution
//!
//! Computes the build order for a requested set of bases. Dependencies are
//! resolved through every name a base provides (the base itself and its
//! sub-packages). A dependency is satisfied without scheduling when it names
//! a managed base outside the requested set or a name provided by the
//! distribution. Names that nothing provides are unresolved: the depending
//! base is still built, flagged and ordered last among its ready peers.
//!
//! Cycles are reported per strongly connected component, so only the bases
//! on a cycle and the bases depending on them are held back.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::metadata::Metadata;
use crate::core::package::Package;
use crate::error::ResolverError;

/// Which bases a cycle should cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every base in the metadata
    All,
    /// Named bases or sub-packages
    Bases(BTreeSet<String>),
}

impl Selection {
    /// Select the given names
    pub fn bases<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Bases(names.into_iter().map(Into::into).collect())
    }
}

/// Dependency graph restricted to the selected bases
///
/// Edges point from a base to the in-graph bases that must be built first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node without edges
    pub fn add_node(&mut self, base: &str) {
        self.dependencies.entry(base.to_string()).or_default();
        self.dependents.entry(base.to_string()).or_default();
    }

    /// Add an edge: `base` must be built after `dependency`
    pub fn add_edge(&mut self, base: &str, dependency: &str) {
        self.add_node(base);
        self.add_node(dependency);
        self.dependencies
            .entry(base.to_string())
            .or_default()
            .insert(dependency.to_string());
        self.dependents
            .entry(dependency.to_string())
            .or_default()
            .insert(base.to_string());
    }

    /// All nodes in lexical order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    /// Check if `base` is in the graph
    pub fn contains(&self, base: &str) -> bool {
        self.dependencies.contains_key(base)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Check if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Direct in-graph dependencies of `base`
    pub fn dependencies(&self, base: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(base)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Direct in-graph dependents of `base`
    pub fn dependents(&self, base: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(base)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every base that depends on `base` directly or transitively
    ///
    /// Returned in breadth-first order, each paired with the dependency
    /// through which it was reached.
    pub fn transitive_dependents(&self, base: &str) -> Vec<(String, String)> {
        let mut seen = BTreeSet::from([base.to_string()]);
        let mut queue = VecDeque::from([base.to_string()]);
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if seen.insert(dependent.to_string()) {
                    result.push((dependent.to_string(), current.clone()));
                    queue.push_back(dependent.to_string());
                }
            }
        }
        result
    }
}

/// Outcome of resolving a selection
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Buildable bases, dependencies strictly before dependents
    pub order: Vec<String>,
    /// Graph over every selected base
    pub graph: DependencyGraph,
    /// Descriptors of every selected base
    pub packages: BTreeMap<String, Package>,
    /// Unresolved dependency names per flagged base
    pub unresolved: BTreeMap<String, BTreeSet<String>>,
    /// Bases that failed resolution themselves
    pub failures: BTreeMap<String, ResolverError>,
    /// Bases held back because they depend on a failed base
    pub blocked: BTreeMap<String, BTreeSet<String>>,
    /// Requested names no descriptor provides
    pub unknown: BTreeSet<String>,
}

impl Resolution {
    /// Check if `base` has unresolved dependencies
    pub fn is_flagged(&self, base: &str) -> bool {
        self.unresolved.contains_key(base)
    }

    /// Distinct dependency cycles, each sorted
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let cycles: BTreeSet<Vec<String>> = self
            .failures
            .values()
            .filter_map(|error| match error {
                ResolverError::DependencyCycle { bases } => Some(bases.clone()),
                _ => None,
            })
            .collect();
        cycles.into_iter().collect()
    }

    /// Check if every selected base can be built
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.blocked.is_empty() && self.unknown.is_empty()
    }

    /// Position of `base` in the build order
    pub fn position(&self, base: &str) -> Option<usize> {
        self.order.iter().position(|b| b == base)
    }
}

/// Resolves build order over package metadata
#[derive(Debug)]
pub struct DependencyResolver<'a> {
    metadata: &'a Metadata,
    /// Descriptor per base; first occurrence wins
    by_base: BTreeMap<&'a str, &'a Package>,
    /// Providing base per name
    providers: BTreeMap<&'a str, &'a str>,
    /// Duplicated or invalid descriptors
    malformed: BTreeMap<&'a str, String>,
}

impl<'a> DependencyResolver<'a> {
    /// Index the metadata
    pub fn new(metadata: &'a Metadata) -> Self {
        let mut by_base = BTreeMap::new();
        let mut malformed = BTreeMap::new();

        for package in &metadata.packages {
            if by_base.contains_key(package.base.as_str()) {
                malformed.insert(package.base.as_str(), "duplicate base in metadata".to_string());
                continue;
            }
            if let Err(e) = package.validate() {
                malformed.insert(package.base.as_str(), e.to_string());
            }
            by_base.insert(package.base.as_str(), package);
        }

        // bases take precedence over sub-package names
        let mut providers: BTreeMap<&str, &str> =
            by_base.keys().map(|&base| (base, base)).collect();
        for (&base, package) in &by_base {
            for name in &package.sub_packages {
                providers.entry(name.as_str()).or_insert(base);
            }
        }

        Self {
            metadata,
            by_base,
            providers,
            malformed,
        }
    }

    /// Base providing `name`, if managed
    pub fn provider(&self, name: &str) -> Option<&'a str> {
        self.providers.get(name).copied()
    }

    /// Resolve the build order for a selection
    pub fn resolve(&self, selection: &Selection) -> Resolution {
        let mut resolution = Resolution::default();

        let selected: BTreeSet<&'a str> = match selection {
            Selection::All => self.by_base.keys().copied().collect(),
            Selection::Bases(names) => names
                .iter()
                .filter_map(|name| {
                    let base = self.provider(name);
                    if base.is_none() {
                        resolution.unknown.insert(name.clone());
                    }
                    base
                })
                .collect(),
        };

        for &base in &selected {
            let package = self.by_base[base];
            resolution.packages.insert(base.to_string(), package.clone());
            resolution.graph.add_node(base);

            for dependency in package.dependency_names() {
                match self.provider(&dependency) {
                    Some(provider) if provider == base => {}
                    Some(provider) if selected.contains(provider) => {
                        resolution.graph.add_edge(base, provider);
                    }
                    Some(_) => {}
                    None if self.metadata.external.contains(&dependency) => {}
                    None => {
                        resolution
                            .unresolved
                            .entry(base.to_string())
                            .or_default()
                            .insert(dependency);
                    }
                }
            }
        }

        for &base in &selected {
            if let Some(message) = self.malformed.get(base) {
                resolution.failures.insert(
                    base.to_string(),
                    ResolverError::MalformedMetadata {
                        base: base.to_string(),
                        message: message.clone(),
                    },
                );
            }
        }

        resolution.order = topological_order(&resolution.graph, &resolution);
        let ordered: BTreeSet<&str> = resolution.order.iter().map(String::as_str).collect();
        let remainder: BTreeSet<String> = resolution
            .graph
            .nodes()
            .filter(|base| !ordered.contains(base) && !resolution.failures.contains_key(*base))
            .map(str::to_string)
            .collect();

        for component in strongly_connected(&resolution.graph, &remainder) {
            let cyclic = component.len() > 1
                || resolution
                    .graph
                    .dependencies(&component[0])
                    .any(|dep| dep == component[0]);
            if !cyclic {
                continue;
            }
            tracing::warn!("Dependency cycle between: {}", component.join(", "));
            for base in &component {
                resolution.failures.insert(
                    base.clone(),
                    ResolverError::DependencyCycle {
                        bases: component.clone(),
                    },
                );
            }
        }

        for base in &remainder {
            if resolution.failures.contains_key(base) {
                continue;
            }
            let blockers = failed_dependencies(&resolution.graph, base, &resolution.failures);
            resolution.blocked.insert(base.clone(), blockers);
        }

        for (base, names) in &resolution.unresolved {
            tracing::warn!(
                "Package '{}' has unresolved dependencies: {}",
                base,
                names.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        resolution
    }
}

/// Kahn's algorithm over the graph, skipping failed nodes
///
/// Ties are broken by name, with flagged bases after unflagged ones.
fn topological_order(graph: &DependencyGraph, resolution: &Resolution) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> = graph
        .nodes()
        .map(|base| (base, graph.dependencies(base).count()))
        .collect();

    let mut ready: BTreeSet<(bool, &str)> = in_degree
        .iter()
        .filter(|(base, degree)| **degree == 0 && !resolution.failures.contains_key(**base))
        .map(|(base, _)| (resolution.is_flagged(base), *base))
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(next) = ready.pop_first() {
        let (_, base) = next;
        order.push(base.to_string());
        for dependent in graph.dependents(base) {
            let Some(degree) = in_degree.get_mut(dependent) else {
                continue;
            };
            *degree -= 1;
            if *degree == 0 && !resolution.failures.contains_key(dependent) {
                ready.insert((resolution.is_flagged(dependent), dependent));
            }
        }
    }
    order
}

/// Tarjan's strongly connected components over `nodes`
///
/// Each component is returned sorted; components are sorted by first member.
fn strongly_connected(graph: &DependencyGraph, nodes: &BTreeSet<String>) -> Vec<Vec<String>> {
    struct State<'g> {
        graph: &'g DependencyGraph,
        nodes: &'g BTreeSet<String>,
        index: usize,
        indices: BTreeMap<&'g str, usize>,
        lowlink: BTreeMap<&'g str, usize>,
        stack: Vec<&'g str>,
        on_stack: BTreeSet<&'g str>,
        components: Vec<Vec<String>>,
    }

    fn visit<'g>(state: &mut State<'g>, node: &'g str) {
        state.indices.insert(node, state.index);
        state.lowlink.insert(node, state.index);
        state.index += 1;
        state.stack.push(node);
        state.on_stack.insert(node);

        let graph = state.graph;
        for dep in graph.dependencies(node) {
            if !state.nodes.contains(dep) {
                continue;
            }
            if !state.indices.contains_key(dep) {
                visit(state, dep);
                let low = state.lowlink[node].min(state.lowlink[dep]);
                state.lowlink.insert(node, low);
            } else if state.on_stack.contains(dep) {
                let low = state.lowlink[node].min(state.indices[dep]);
                state.lowlink.insert(node, low);
            }
        }

        if state.lowlink[node] == state.indices[node] {
            let mut component = Vec::new();
            while let Some(member) = state.stack.pop() {
                state.on_stack.remove(member);
                component.push(member.to_string());
                if member == node {
                    break;
                }
            }
            component.sort();
            state.components.push(component);
        }
    }

    let mut state = State {
        graph,
        nodes,
        index: 0,
        indices: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        stack: Vec::new(),
        on_stack: BTreeSet::new(),
        components: Vec::new(),
    };

    for node in nodes {
        if !state.indices.contains_key(node.as_str()) {
            visit(&mut state, node);
        }
    }

    let mut components = state.components;
    components.sort();
    components
}

/// Failed bases reachable from `base` through its dependencies
fn failed_dependencies(
    graph: &DependencyGraph,
    base: &str,
    failures: &BTreeMap<String, ResolverError>,
) -> BTreeSet<String> {
    let mut blockers = BTreeSet::new();
    let mut seen = BTreeSet::from([base]);
    let mut stack = vec![base];

    while let Some(current) = stack.pop() {
        for dep in graph.dependencies(current) {
            if !seen.insert(dep) {
                continue;
            }
            if failures.contains_key(dep) {
                blockers.insert(dep.to_string());
            } else {
                stack.push(dep);
            }
        }
    }
    blockers
}
