/// Pure graph computation over the dependency edge set. No writes; every
/// operation here takes an adjacency snapshot built from `Store` rows
/// inside the caller's transaction and never lives past it.
use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::errors::{ResolverError, ResolverResult};
use crate::types::{DependencyEdge, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// In-memory adjacency over the edge table, rebuilt fresh per transaction
/// per §4.2's "no cross-transaction cache" rule.
pub struct DependencyGraph {
    /// dependent -> prerequisites
    prerequisites_of: HashMap<Uuid, Vec<Uuid>>,
    /// prerequisite -> dependents
    dependents_of: HashMap<Uuid, Vec<Uuid>>,
}

impl DependencyGraph {
    pub fn from_edges(edges: &[DependencyEdge]) -> Self {
        let mut prerequisites_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut dependents_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for edge in edges {
            prerequisites_of
                .entry(edge.dependent_id)
                .or_default()
                .push(edge.prerequisite_id);
            dependents_of
                .entry(edge.prerequisite_id)
                .or_default()
                .push(edge.dependent_id);
        }
        Self {
            prerequisites_of,
            dependents_of,
        }
    }

    fn prerequisites(&self, id: Uuid) -> &[Uuid] {
        self.prerequisites_of.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn dependents(&self, id: Uuid) -> &[Uuid] {
        self.dependents_of.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Overlays proposed (dependent, prerequisite) edges and runs a
    /// three-color DFS cycle check rooted at each touched node. A back-edge
    /// into a gray (on-stack) node is a cycle; the path from the first
    /// occurrence of that node to the current node is returned.
    pub fn detect_cycles_on_add(&self, new_edges: &[(Uuid, Uuid)]) -> ResolverResult<()> {
        let mut prerequisites_of = self.prerequisites_of.clone();
        for (dependent, prerequisite) in new_edges {
            prerequisites_of.entry(*dependent).or_default().push(*prerequisite);
        }

        let mut colors: HashMap<Uuid, Color> = HashMap::new();
        let touched: HashSet<Uuid> = new_edges
            .iter()
            .flat_map(|(a, b)| [*a, *b])
            .collect();

        for &start in &touched {
            if colors.get(&start).copied().unwrap_or(Color::White) == Color::White {
                let mut path = Vec::new();
                if let Some(cycle) =
                    dfs_detect_cycle(start, &prerequisites_of, &mut colors, &mut path)
                {
                    return Err(ResolverError::CircularDependency { cycle_path: cycle });
                }
            }
        }
        Ok(())
    }

    /// depth(id) = 1 + max(depth(prereq)) or 0 if no prerequisites. Assumes
    /// acyclicity (cycles must already have been rejected by
    /// `detect_cycles_on_add`).
    pub fn calculate_depth(&self, id: Uuid) -> i64 {
        let mut memo: HashMap<Uuid, i64> = HashMap::new();
        depth_dfs(id, self, &mut memo)
    }

    /// BFS over the reverse (dependent) direction, accumulating every
    /// reachable dependent. Used by cascade cancellation/failure.
    pub fn transitive_dependents(&self, id: Uuid) -> Vec<Uuid> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(id);
        visited.insert(id);

        let mut result = Vec::new();
        while let Some(current) = queue.pop_front() {
            for &dependent in self.dependents(current) {
                if visited.insert(dependent) {
                    result.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }
        result
    }

    /// Direct prerequisite ids of a task.
    pub fn direct_prerequisites(&self, id: Uuid) -> &[Uuid] {
        self.prerequisites(id)
    }

    /// Direct dependent ids of a task.
    pub fn direct_dependents(&self, id: Uuid) -> &[Uuid] {
        self.dependents(id)
    }
}

fn dfs_detect_cycle(
    node: Uuid,
    prerequisites_of: &HashMap<Uuid, Vec<Uuid>>,
    colors: &mut HashMap<Uuid, Color>,
    path: &mut Vec<Uuid>,
) -> Option<Vec<Uuid>> {
    colors.insert(node, Color::Gray);
    path.push(node);

    if let Some(prereqs) = prerequisites_of.get(&node) {
        for &next in prereqs {
            match colors.get(&next).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = dfs_detect_cycle(next, prerequisites_of, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start_idx = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<Uuid> = path[start_idx..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }
    }

    path.pop();
    colors.insert(node, Color::Black);
    None
}

fn depth_dfs(node: Uuid, graph: &DependencyGraph, memo: &mut HashMap<Uuid, i64>) -> i64 {
    if let Some(&d) = memo.get(&node) {
        return d;
    }
    let prereqs = graph.prerequisites(node);
    let depth = if prereqs.is_empty() {
        0
    } else {
        1 + prereqs
            .iter()
            .map(|&p| depth_dfs(p, graph, memo))
            .max()
            .unwrap_or(0)
    };
    memo.insert(node, depth);
    depth
}

/// Given a task's unresolved prerequisite ids and a lookup of current
/// statuses, returns the subset not yet `completed`.
pub fn unmet_prerequisites(
    prerequisite_ids: &[Uuid],
    status_of: impl Fn(Uuid) -> Option<TaskStatus>,
) -> Vec<Uuid> {
    prerequisite_ids
        .iter()
        .copied()
        .filter(|id| status_of(*id) != Some(TaskStatus::Completed))
        .collect()
}

/// Layered topological sort over a restricted task id set, for
/// `execution_plan`. Batch 0 is every task with no prerequisite inside the
/// set; batch k+1 is every remaining task whose in-set prerequisites all
/// lie in batches 0..=k. Classic Kahn's algorithm, peeling one full
/// zero-in-degree layer at a time instead of a single node.
pub fn execution_plan(
    ids: &[Uuid],
    edges: &[DependencyEdge],
) -> ResolverResult<Vec<Vec<Uuid>>> {
    let id_set: HashSet<Uuid> = ids.iter().copied().collect();
    let mut in_degree: HashMap<Uuid, usize> = ids.iter().map(|&id| (id, 0)).collect();
    let mut dependents_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

    for edge in edges {
        if id_set.contains(&edge.dependent_id) && id_set.contains(&edge.prerequisite_id) {
            *in_degree.entry(edge.dependent_id).or_insert(0) += 1;
            dependents_of
                .entry(edge.prerequisite_id)
                .or_default()
                .push(edge.dependent_id);
        }
    }

    let mut batches = Vec::new();
    let mut remaining: HashSet<Uuid> = id_set.clone();
    let mut current: Vec<Uuid> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    current.sort();

    while !current.is_empty() {
        for id in &current {
            remaining.remove(id);
        }
        let mut next_layer = HashSet::new();
        for &id in &current {
            if let Some(dependents) = dependents_of.get(&id) {
                for &dependent in dependents {
                    let deg = in_degree.get_mut(&dependent).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        next_layer.insert(dependent);
                    }
                }
            }
        }
        batches.push(std::mem::take(&mut current));
        current = next_layer.into_iter().collect();
        current.sort();
    }

    if !remaining.is_empty() {
        let cycle_path = remaining.into_iter().collect();
        return Err(ResolverError::CircularDependency { cycle_path });
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(dependent: Uuid, prerequisite: Uuid) -> DependencyEdge {
        DependencyEdge {
            id: Uuid::new_v4(),
            dependent_id: dependent,
            prerequisite_id: prerequisite,
            kind: crate::types::DependencyKind::Sequential,
            created_at: chrono::Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn linear_chain_has_increasing_depth() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let edges = vec![edge(b, a), edge(c, b)];
        let graph = DependencyGraph::from_edges(&edges);

        assert_eq!(graph.calculate_depth(a), 0);
        assert_eq!(graph.calculate_depth(b), 1);
        assert_eq!(graph.calculate_depth(c), 2);
    }

    #[test]
    fn diamond_depth_takes_max_branch() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();
        let edges = vec![edge(b, a), edge(c, a), edge(d, b), edge(d, c)];
        let graph = DependencyGraph::from_edges(&edges);

        assert_eq!(graph.calculate_depth(d), 2);
    }

    #[test]
    fn self_edge_is_rejected() {
        let a = Uuid::new_v4();
        let graph = DependencyGraph::from_edges(&[]);
        let err = graph.detect_cycles_on_add(&[(a, a)]).unwrap_err();
        assert!(matches!(err, ResolverError::CircularDependency { .. }));
    }

    #[test]
    fn closing_a_cycle_is_rejected_with_full_path() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let edges = vec![edge(b, a), edge(c, b)];
        let graph = DependencyGraph::from_edges(&edges);

        let err = graph.detect_cycles_on_add(&[(a, c)]).unwrap_err();
        match err {
            ResolverError::CircularDependency { cycle_path } => {
                assert!(cycle_path.contains(&a));
                assert!(cycle_path.contains(&b));
                assert!(cycle_path.contains(&c));
            }
            _ => panic!("expected circular dependency"),
        }
    }

    #[test]
    fn transitive_dependents_follows_reverse_edges() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();
        // linear chain a -> b -> c -> d (b depends on a, etc.)
        let edges = vec![edge(b, a), edge(c, b), edge(d, c)];
        let graph = DependencyGraph::from_edges(&edges);

        let mut dependents = graph.transitive_dependents(a);
        dependents.sort();
        let mut expected = vec![b, c, d];
        expected.sort();
        assert_eq!(dependents, expected);
    }

    #[test]
    fn execution_plan_layers_diamond() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();
        let edges = vec![edge(b, a), edge(c, a), edge(d, b), edge(d, c)];
        let ids = vec![a, b, c, d];

        let batches = execution_plan(&ids, &edges).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec![a]);
        let mut batch1 = batches[1].clone();
        batch1.sort();
        let mut expected1 = vec![b, c];
        expected1.sort();
        assert_eq!(batch1, expected1);
        assert_eq!(batches[2], vec![d]);
    }

    #[test]
    fn execution_plan_rejects_cycle_in_restricted_set() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let edges = vec![edge(a, b), edge(b, a)];
        let err = execution_plan(&[a, b], &edges).unwrap_err();
        assert!(matches!(err, ResolverError::CircularDependency { .. }));
    }
}
