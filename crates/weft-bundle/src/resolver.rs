//! Dependency resolution
//!
//! Bundles live in an arena indexed by position; edges are adjacency lists of
//! indices. Resolution checks identities, dependency constraints, conflicts
//! and cycles, then orders bundles so that dependencies load first.

use crate::manifest::BundleDescriptor;
use crate::semver::Version;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, info_span};
use weft_unit::{BundleRelations, PatchDeclaration};

/// Errors that can occur during dependency resolution
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolverError {
    /// Two discovered bundles share an id
    #[error("Duplicate bundle id '{id}' (versions {first} and {second})")]
    DuplicateId {
        id: String,
        first: Version,
        second: Version,
    },

    /// A required dependency is missing or no present version satisfies it
    #[error("Bundle '{bundle}' requires {dependency} {constraint}, {}", describe_found(.found))]
    UnresolvedDependency {
        bundle: String,
        dependency: String,
        constraint: String,
        found: Option<Version>,
    },

    /// Two present bundles are declared incompatible
    #[error("Bundle '{bundle}' conflicts with '{conflicts_with}' ({constraint})")]
    Conflict {
        bundle: String,
        conflicts_with: String,
        constraint: String,
    },

    /// Dependency cycle; the path starts and ends with the same id
    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
}

fn describe_found(found: &Option<Version>) -> String {
    match found {
        Some(version) => format!("but version {} is present", version),
        None => "but it is not present".to_string(),
    }
}

/// Dependency resolver over one run's bundles
pub struct DependencyResolver {
    /// Bundle arena
    nodes: Vec<BundleDescriptor>,

    /// Bundle id → arena index
    index: FxHashMap<String, usize>,
}

/// Bundles in load order, with their dependency relation
#[derive(Debug, Clone)]
pub struct ResolvedBundles {
    /// Bundles, dependencies before dependents
    order: Vec<BundleDescriptor>,

    /// Bundle id → position in `order`
    position: FxHashMap<String, usize>,

    /// Direct dependencies of each position
    direct: Vec<Vec<usize>>,

    /// Transitive dependencies of each position
    transitive: Vec<FxHashSet<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl DependencyResolver {
    /// Build the arena; fails on duplicate ids
    pub fn new(bundles: impl IntoIterator<Item = BundleDescriptor>) -> Result<Self, ResolverError> {
        let mut nodes: Vec<BundleDescriptor> = Vec::new();
        let mut index = FxHashMap::default();

        for bundle in bundles {
            if let Some(&existing) = index.get(bundle.id()) {
                let first: &BundleDescriptor = &nodes[existing];
                return Err(ResolverError::DuplicateId {
                    id: bundle.id().to_string(),
                    first: first.version().clone(),
                    second: bundle.version().clone(),
                });
            }
            index.insert(bundle.id().to_string(), nodes.len());
            nodes.push(bundle);
        }

        Ok(Self { nodes, index })
    }

    /// Arena indices sorted by bundle id
    fn sorted_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.nodes.len()).collect();
        indices.sort_by(|&a, &b| self.nodes[a].id().cmp(self.nodes[b].id()));
        indices
    }

    /// Resolve the graph into a load order
    pub fn resolve(self) -> Result<ResolvedBundles, ResolverError> {
        let _span = info_span!("resolve", bundles = self.nodes.len()).entered();

        let sorted = self.sorted_indices();
        let edges = self.build_edges(&sorted)?;
        self.check_conflicts(&sorted)?;
        self.check_cycles(&sorted, &edges)?;
        let order = self.load_order(&edges);

        let resolved = ResolvedBundles::new(self.nodes, &order, &edges);
        info!(
            order = %resolved.ids().collect::<Vec<_>>().join(", "),
            "resolved load order"
        );
        Ok(resolved)
    }

    /// Verify every dependency and keep the satisfied ones as edges
    fn build_edges(&self, sorted: &[usize]) -> Result<Vec<Vec<usize>>, ResolverError> {
        let mut edges = vec![Vec::new(); self.nodes.len()];

        for &i in sorted {
            let bundle = &self.nodes[i];
            for dep in bundle.dependencies() {
                let target = self.index.get(&dep.id).copied();
                let found = target.map(|j| self.nodes[j].version());
                let satisfied =
                    dep.req.is_satisfiable() && found.is_some_and(|v| dep.req.matches(v));

                match target {
                    Some(j) if satisfied => edges[i].push(j),
                    _ if dep.optional => {
                        debug!(
                            bundle = bundle.id(),
                            dependency = %dep.id,
                            constraint = %dep.req,
                            "dropping unsatisfied optional dependency"
                        );
                    }
                    _ => {
                        return Err(ResolverError::UnresolvedDependency {
                            bundle: bundle.id().to_string(),
                            dependency: dep.id.clone(),
                            constraint: dep.req.to_string(),
                            found: found.cloned(),
                        })
                    }
                }
            }
            edges[i].sort_by(|&a, &b| self.nodes[a].id().cmp(self.nodes[b].id()));
        }

        Ok(edges)
    }

    /// Each bundle's own conflict list against the present bundles
    fn check_conflicts(&self, sorted: &[usize]) -> Result<(), ResolverError> {
        for &i in sorted {
            let bundle = &self.nodes[i];
            for conflict in bundle.conflicts() {
                let Some(&j) = self.index.get(&conflict.id) else {
                    continue;
                };
                if conflict.req.matches(self.nodes[j].version()) {
                    return Err(ResolverError::Conflict {
                        bundle: bundle.id().to_string(),
                        conflicts_with: conflict.id.clone(),
                        constraint: conflict.req.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Depth-first search with visiting/done marks
    fn check_cycles(&self, sorted: &[usize], edges: &[Vec<usize>]) -> Result<(), ResolverError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();

        for &start in sorted {
            if marks[start] == Mark::Unvisited {
                self.visit(start, edges, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        edges: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Result<(), ResolverError> {
        marks[node] = Mark::Visiting;
        stack.push(node);

        for &dep in &edges[node] {
            match marks[dep] {
                Mark::Unvisited => self.visit(dep, edges, marks, stack)?,
                Mark::Visiting => {
                    // Back edge: the cycle is the stack suffix starting at `dep`
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let path = stack[start..]
                        .iter()
                        .chain(std::iter::once(&dep))
                        .map(|&n| self.nodes[n].id().to_string())
                        .collect();
                    return Err(ResolverError::CyclicDependency { path });
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        Ok(())
    }

    /// Kahn's algorithm; ready bundles leave in ascending id order
    fn load_order(&self, edges: &[Vec<usize>]) -> Vec<usize> {
        let mut pending: Vec<usize> = edges.iter().map(Vec::len).collect();
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (i, deps) in edges.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(i);
            }
        }

        let mut ready: BTreeSet<(&str, usize)> = pending
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(i, _)| (self.nodes[i].id(), i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some((_, next)) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert((self.nodes[dependent].id(), dependent));
                }
            }
        }
        order
    }
}

impl ResolvedBundles {
    fn new(nodes: Vec<BundleDescriptor>, order: &[usize], edges: &[Vec<usize>]) -> Self {
        let mut arena_to_position = vec![0; nodes.len()];
        for (position, &arena) in order.iter().enumerate() {
            arena_to_position[arena] = position;
        }

        let direct: Vec<Vec<usize>> = order
            .iter()
            .map(|&arena| edges[arena].iter().map(|&dep| arena_to_position[dep]).collect())
            .collect();

        // Dependencies precede dependents, so one forward pass closes the relation.
        let mut transitive: Vec<FxHashSet<usize>> = Vec::with_capacity(order.len());
        for deps in &direct {
            let mut all = FxHashSet::default();
            for &dep in deps {
                all.insert(dep);
                all.extend(transitive[dep].iter().copied());
            }
            transitive.push(all);
        }

        let mut slots: Vec<Option<BundleDescriptor>> = nodes.into_iter().map(Some).collect();
        let order: Vec<BundleDescriptor> = order
            .iter()
            .filter_map(|&arena| slots[arena].take())
            .collect();
        let position = order
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id().to_string(), i))
            .collect();

        Self {
            order,
            position,
            direct,
            transitive,
        }
    }

    /// Bundles in load order
    pub fn bundles(&self) -> &[BundleDescriptor] {
        &self.order
    }

    /// Bundle ids in load order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(BundleDescriptor::id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&BundleDescriptor> {
        self.position(id).map(|i| &self.order[i])
    }

    /// Position of a bundle in the load order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.position.get(id).copied()
    }

    /// Ids of the bundles `id` directly depends on
    pub fn direct_dependencies(&self, id: &str) -> Vec<&str> {
        match self.position(id) {
            Some(i) => self.direct[i].iter().map(|&d| self.order[d].id()).collect(),
            None => Vec::new(),
        }
    }

    /// Every patch declaration, tagged with its bundle id, in load order
    pub fn patches(&self) -> impl Iterator<Item = (&str, &PatchDeclaration)> {
        self.order
            .iter()
            .flat_map(|b| b.patches().iter().map(move |p| (b.id(), p)))
    }
}

impl BundleRelations for ResolvedBundles {
    fn depends_on(&self, dependent: &str, dependency: &str) -> bool {
        match (self.position(dependent), self.position(dependency)) {
            (Some(a), Some(b)) => self.transitive[a].contains(&b),
            _ => false,
        }
    }
}
