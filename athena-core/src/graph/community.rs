//! Deterministic community detection.
//!
//! Greedy modularity label propagation in the louvain family. Determinism
//! matters more here than partition optimality: node visit order is fixed by
//! sorting ids, and the seed only perturbs tie-breaking, so a fixed input
//! partition and seed always reproduce the same communities. Leiden
//! selection runs the same pass with a refinement sweep that splits
//! disconnected communities.

use super::CommunityAlgorithm;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Parameters for a detection run
#[derive(Debug, Clone)]
pub struct CommunityParams {
    pub algorithm: CommunityAlgorithm,
    /// Higher resolution favors more, smaller communities
    pub resolution: f64,
    /// Tie-break seed; fixed seed + fixed input = fixed output
    pub seed: u64,
    /// Maximum label-propagation sweeps
    pub max_iterations: usize,
}

impl Default for CommunityParams {
    fn default() -> Self {
        Self {
            algorithm: CommunityAlgorithm::Louvain,
            resolution: 1.0,
            seed: 42,
            max_iterations: 20,
        }
    }
}

/// Detect communities over weighted undirected edges.
///
/// `edges` are `(from, to, weight)`; direction is ignored. Returns the
/// partition as label -> members, with members sorted for stable output.
#[must_use]
pub fn detect_communities(
    nodes: &[Uuid],
    edges: &[(Uuid, Uuid, f32)],
    params: &CommunityParams,
) -> Vec<Vec<Uuid>> {
    if nodes.is_empty() {
        return Vec::new();
    }

    // Stable ordering independent of input order
    let mut ordered: Vec<Uuid> = nodes.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut weights: HashMap<Uuid, Vec<(Uuid, f64)>> = HashMap::new();
    let mut total_weight = 0.0f64;
    for &(from, to, w) in edges {
        if from == to {
            continue;
        }
        let w = f64::from(w.max(0.0));
        weights.entry(from).or_default().push((to, w));
        weights.entry(to).or_default().push((from, w));
        total_weight += w;
    }
    if total_weight == 0.0 {
        // No structure: every node is its own community
        return ordered.into_iter().map(|n| vec![n]).collect();
    }

    let degree: HashMap<Uuid, f64> = ordered
        .iter()
        .map(|n| {
            let d = weights
                .get(n)
                .map(|adj| adj.iter().map(|(_, w)| w).sum())
                .unwrap_or(0.0);
            (*n, d)
        })
        .collect();

    // Initial partition: one label per node
    let mut label: BTreeMap<Uuid, Uuid> = ordered.iter().map(|n| (*n, *n)).collect();

    for _ in 0..params.max_iterations {
        let mut changed = false;

        for node in &ordered {
            let Some(adj) = weights.get(node) else {
                continue;
            };

            // Weight of edges into each neighboring label
            let mut label_weight: BTreeMap<Uuid, f64> = BTreeMap::new();
            for (neighbor, w) in adj {
                let l = label[neighbor];
                *label_weight.entry(l).or_insert(0.0) += w;
            }

            let current = label[node];
            let node_degree = degree[node];

            // Modularity gain of joining label l, up to constants
            let gain = |l: Uuid, w_in: f64| -> f64 {
                let label_degree: f64 = ordered
                    .iter()
                    .filter(|n| label[*n] == l && *n != node)
                    .map(|n| degree[n])
                    .sum();
                w_in - params.resolution * node_degree * label_degree / (2.0 * total_weight)
            };

            let mut best = (current, gain(current, label_weight.get(&current).copied().unwrap_or(0.0)));
            for (&l, &w_in) in &label_weight {
                if l == current {
                    continue;
                }
                let g = gain(l, w_in);
                // Ties break on a seeded scramble of the label id
                let better = g > best.1 + 1e-12
                    || ((g - best.1).abs() <= 1e-12
                        && tie_break(params.seed, l) < tie_break(params.seed, best.0));
                if better {
                    best = (l, g);
                }
            }

            if best.0 != current {
                label.insert(*node, best.0);
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    let mut groups: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
    for (node, l) in &label {
        groups.entry(*l).or_default().insert(*node);
    }

    let mut partition: Vec<Vec<Uuid>> = groups
        .into_values()
        .map(|members| members.into_iter().collect())
        .collect();

    if params.algorithm == CommunityAlgorithm::Leiden {
        partition = refine_connected(partition, &weights);
    }

    partition.sort();
    partition
}

/// Leiden-style refinement: split communities whose members are not
/// connected inside the community subgraph
fn refine_connected(
    partition: Vec<Vec<Uuid>>,
    weights: &HashMap<Uuid, Vec<(Uuid, f64)>>,
) -> Vec<Vec<Uuid>> {
    let mut refined = Vec::new();
    for community in partition {
        let members: BTreeSet<Uuid> = community.iter().copied().collect();
        let mut unvisited = members.clone();
        while let Some(&start) = unvisited.iter().next() {
            let mut component = BTreeSet::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if !unvisited.remove(&node) {
                    continue;
                }
                component.insert(node);
                for (neighbor, _) in weights.get(&node).into_iter().flatten() {
                    if members.contains(neighbor) && unvisited.contains(neighbor) {
                        stack.push(*neighbor);
                    }
                }
            }
            refined.push(component.into_iter().collect());
        }
    }
    refined
}

fn tie_break(seed: u64, id: Uuid) -> u64 {
    // SplitMix-style scramble of the id under the seed
    let mut x = seed ^ (id.as_u128() as u64) ^ ((id.as_u128() >> 64) as u64);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clique(ids: &[Uuid]) -> Vec<(Uuid, Uuid, f32)> {
        let mut edges = Vec::new();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                edges.push((a, b, 1.0));
            }
        }
        edges
    }

    #[test]
    fn test_two_cliques_become_two_communities() {
        let left: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let right: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut edges = clique(&left);
        edges.extend(clique(&right));
        // One weak bridge
        edges.push((left[0], right[0], 0.05));

        let nodes: Vec<Uuid> = left.iter().chain(right.iter()).copied().collect();
        let partition = detect_communities(&nodes, &edges, &CommunityParams::default());
        assert_eq!(partition.len(), 2);
        assert!(partition.iter().all(|c| c.len() == 4));
    }

    #[test]
    fn test_detection_is_deterministic() {
        let nodes: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let edges = clique(&nodes[..5]);
        let params = CommunityParams::default();

        let a = detect_communities(&nodes, &edges, &params);
        let b = detect_communities(&nodes, &edges, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_edges_yields_singletons() {
        let nodes: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let partition = detect_communities(&nodes, &[], &CommunityParams::default());
        assert_eq!(partition.len(), 3);
        assert!(partition.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_empty_graph() {
        assert!(detect_communities(&[], &[], &CommunityParams::default()).is_empty());
    }

    #[test]
    fn test_leiden_splits_disconnected_community() {
        // Force a partition where refinement matters: two disconnected pairs
        let nodes: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let edges = vec![
            (nodes[0], nodes[1], 1.0),
            (nodes[2], nodes[3], 1.0),
        ];
        let params = CommunityParams {
            algorithm: CommunityAlgorithm::Leiden,
            ..Default::default()
        };
        let partition = detect_communities(&nodes, &edges, &params);
        // Each connected pair stays a community of two
        assert!(partition.iter().all(|c| c.len() <= 2));
        assert_eq!(partition.iter().map(Vec::len).sum::<usize>(), 4);
    }
}
