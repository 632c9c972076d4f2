use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::{SkeletonAnalyzer, SkeletonTopology, TopologyOptions};

type Voxel = (i32, i32);

const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// Skeleton-graph analysis over an 8-connected, one-pixel-wide skeleton.
///
/// Voxels are classified by neighbor count (end <= 1, slab = 2, junction
/// >= 3); adjacent junction voxels cluster into one junction; branches are
/// the slab chains between junctions and end points, measured with 1/sqrt(2)
/// step lengths. Dead-end pruning removes terminal branches once, keeping
/// junction voxels, then reclassifies. The longest shortest path is the
/// geodesic diameter of the voxel graph (double-sweep).
pub struct GraphSkeletonAnalyzer;

impl SkeletonAnalyzer for GraphSkeletonAnalyzer {
    fn analyze(&self, skeleton: &GrayImage, scale: f64, options: TopologyOptions) -> Vec<SkeletonTopology> {
        let labels = connected_components(skeleton, Connectivity::Eight, Luma([0u8]));
        let (width, height) = skeleton.dimensions();

        let mut order: Vec<u32> = Vec::new();
        let mut components: HashMap<u32, Vec<Voxel>> = HashMap::new();
        for y in 0..height {
            for x in 0..width {
                let label = labels.get_pixel(x, y)[0];
                if label == 0 {
                    continue;
                }
                match components.get_mut(&label) {
                    Some(pixels) => pixels.push((x as i32, y as i32)),
                    None => {
                        order.push(label);
                        components.insert(label, vec![(x as i32, y as i32)]);
                    }
                }
            }
        }

        order
            .into_iter()
            .map(|label| analyze_component(&components[&label], scale, options))
            .collect()
    }
}

fn neighbors(set: &HashSet<Voxel>, (x, y): Voxel) -> Vec<Voxel> {
    let mut result = Vec::with_capacity(8);
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let candidate = (x + dx, y + dy);
            if set.contains(&candidate) {
                result.push(candidate);
            }
        }
    }
    result
}

fn step_length(a: Voxel, b: Voxel) -> f64 {
    if a.0 != b.0 && a.1 != b.1 {
        SQRT_2
    } else {
        1.0
    }
}

fn neighbor_counts(set: &HashSet<Voxel>) -> HashMap<Voxel, usize> {
    set.iter().map(|&v| (v, neighbors(set, v).len())).collect()
}

fn analyze_component(pixels: &[Voxel], scale: f64, options: TopologyOptions) -> SkeletonTopology {
    let mut set: HashSet<Voxel> = pixels.iter().copied().collect();
    if options.prune_dead_ends {
        set = prune_terminal_branches(&set);
    }

    let counts = neighbor_counts(&set);
    let mut topology = SkeletonTopology::default();
    for &count in counts.values() {
        match count {
            0 | 1 => topology.num_end_points += 1,
            2 => topology.num_slab_voxels += 1,
            3 => {
                topology.num_junction_voxels += 1;
                topology.num_triple_points += 1;
            }
            4 => {
                topology.num_junction_voxels += 1;
                topology.num_quadruple_points += 1;
            }
            _ => topology.num_junction_voxels += 1,
        }
    }

    let nodes = assign_nodes(&set, &counts);
    topology.num_junctions = nodes.junction_clusters;

    let branch_lengths = trace_branches(&set, &counts, &nodes, scale);
    topology.num_branches = branch_lengths.len() as u32;
    topology.max_branch_length = branch_lengths.iter().fold(0.0_f64, |a, &b| a.max(b));
    topology.average_branch_length = if branch_lengths.is_empty() {
        None
    } else {
        Some(branch_lengths.iter().sum::<f64>() / branch_lengths.len() as f64)
    };

    if options.calculate_shortest_paths {
        topology.longest_shortest_path = geodesic_diameter(&set, &counts) * scale;
    }

    topology
}

/// Remove every branch running from an end point to the nearest junction.
/// Components without junctions (bare lines, loops) are left untouched, so
/// pruning can never erase a skeleton entirely.
fn prune_terminal_branches(set: &HashSet<Voxel>) -> HashSet<Voxel> {
    let counts = neighbor_counts(set);
    let has_junction = counts.values().any(|&c| c >= 3);
    if !has_junction {
        return set.clone();
    }

    let mut removed: HashSet<Voxel> = HashSet::new();
    let mut ends: Vec<Voxel> = counts
        .iter()
        .filter(|(_, &c)| c <= 1)
        .map(|(&v, _)| v)
        .collect();
    ends.sort();

    for end in ends {
        let mut path = vec![end];
        let mut prev: Option<Voxel> = None;
        let mut current = end;
        loop {
            let next: Vec<Voxel> = neighbors(set, current)
                .into_iter()
                .filter(|&v| Some(v) != prev)
                .collect();
            if next.iter().any(|v| counts[v] >= 3) {
                removed.extend(path);
                break;
            }
            match next.iter().find(|v| counts[*v] == 2) {
                Some(&slab) => {
                    prev = Some(current);
                    current = slab;
                    path.push(current);
                }
                None => break,
            }
        }
    }

    set.difference(&removed).copied().collect()
}

struct NodeAssignment {
    node_of: HashMap<Voxel, usize>,
    junction_clusters: u32,
}

/// Junction voxels cluster into junction nodes; each end point is its own
/// node. Slab voxels belong to no node.
fn assign_nodes(set: &HashSet<Voxel>, counts: &HashMap<Voxel, usize>) -> NodeAssignment {
    let mut node_of: HashMap<Voxel, usize> = HashMap::new();
    let mut next_node = 0;
    let mut junction_clusters = 0;

    let mut junctions: Vec<Voxel> = counts
        .iter()
        .filter(|(_, &c)| c >= 3)
        .map(|(&v, _)| v)
        .collect();
    junctions.sort();
    let junction_set: HashSet<Voxel> = junctions.iter().copied().collect();

    for &seed in &junctions {
        if node_of.contains_key(&seed) {
            continue;
        }
        junction_clusters += 1;
        let node = next_node;
        next_node += 1;
        let mut stack = vec![seed];
        node_of.insert(seed, node);
        while let Some(voxel) = stack.pop() {
            for neighbor in neighbors(set, voxel) {
                if junction_set.contains(&neighbor) && !node_of.contains_key(&neighbor) {
                    node_of.insert(neighbor, node);
                    stack.push(neighbor);
                }
            }
        }
    }

    let mut ends: Vec<Voxel> = counts
        .iter()
        .filter(|(_, &c)| c <= 1)
        .map(|(&v, _)| v)
        .collect();
    ends.sort();
    for end in ends {
        node_of.insert(end, next_node);
        next_node += 1;
    }

    NodeAssignment { node_of, junction_clusters }
}

fn trace_branches(
    set: &HashSet<Voxel>,
    counts: &HashMap<Voxel, usize>,
    nodes: &NodeAssignment,
    scale: f64,
) -> Vec<f64> {
    let mut lengths = Vec::new();

    // A component with neither ends nor junctions is a closed loop: one
    // branch running the whole cycle.
    if nodes.node_of.is_empty() {
        if let Some(length) = cycle_length(set) {
            lengths.push(length * scale);
        }
        return lengths;
    }

    let mut node_pixels: Vec<Voxel> = nodes.node_of.keys().copied().collect();
    node_pixels.sort();

    let mut visited_slabs: HashSet<Voxel> = HashSet::new();
    let mut direct_pairs: HashSet<(usize, usize)> = HashSet::new();

    for &start in &node_pixels {
        for neighbor in neighbors(set, start) {
            if let Some(&neighbor_node) = nodes.node_of.get(&neighbor) {
                let start_node = nodes.node_of[&start];
                if neighbor_node == start_node {
                    continue;
                }
                let pair = (start_node.min(neighbor_node), start_node.max(neighbor_node));
                if direct_pairs.insert(pair) {
                    lengths.push(step_length(start, neighbor) * scale);
                }
                continue;
            }

            // Slab chain: walk until the next node pixel.
            if counts[&neighbor] != 2 || visited_slabs.contains(&neighbor) {
                continue;
            }
            let mut length = step_length(start, neighbor);
            let mut prev = start;
            let mut current = neighbor;
            visited_slabs.insert(current);
            loop {
                let next: Vec<Voxel> = neighbors(set, current)
                    .into_iter()
                    .filter(|&v| v != prev)
                    .collect();
                if let Some(&node) = next.iter().find(|v| nodes.node_of.contains_key(*v)) {
                    length += step_length(current, node);
                    lengths.push(length * scale);
                    break;
                }
                match next.iter().find(|v| counts[*v] == 2 && !visited_slabs.contains(*v)) {
                    Some(&slab) => {
                        length += step_length(current, slab);
                        prev = current;
                        current = slab;
                        visited_slabs.insert(current);
                    }
                    None => break,
                }
            }
        }
    }

    lengths
}

fn cycle_length(set: &HashSet<Voxel>) -> Option<f64> {
    let start = set.iter().min().copied()?;
    let first = neighbors(set, start).into_iter().min()?;
    let mut length = step_length(start, first);
    let mut prev = start;
    let mut current = first;
    while current != start {
        let next = neighbors(set, current).into_iter().find(|&v| v != prev)?;
        length += step_length(current, next);
        prev = current;
        current = next;
    }
    Some(length)
}

#[derive(PartialEq)]
struct QueueEntry {
    distance: f64,
    voxel: Voxel,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the smallest distance first.
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.voxel.cmp(&self.voxel))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn farthest_from(set: &HashSet<Voxel>, start: Voxel) -> (Voxel, f64) {
    let mut distances: HashMap<Voxel, f64> = HashMap::new();
    let mut heap = BinaryHeap::new();
    distances.insert(start, 0.0);
    heap.push(QueueEntry { distance: 0.0, voxel: start });

    let mut farthest = (start, 0.0_f64);
    while let Some(QueueEntry { distance, voxel }) = heap.pop() {
        if distance > distances[&voxel] {
            continue;
        }
        if distance > farthest.1 {
            farthest = (voxel, distance);
        }
        for neighbor in neighbors(set, voxel) {
            let candidate = distance + step_length(voxel, neighbor);
            if distances.get(&neighbor).map_or(true, |&d| candidate < d) {
                distances.insert(neighbor, candidate);
                heap.push(QueueEntry { distance: candidate, voxel: neighbor });
            }
        }
    }
    farthest
}

fn geodesic_diameter(set: &HashSet<Voxel>, counts: &HashMap<Voxel, usize>) -> f64 {
    if set.is_empty() {
        return 0.0;
    }
    let mut ends: Vec<Voxel> = counts
        .iter()
        .filter(|(_, &c)| c <= 1)
        .map(|(&v, _)| v)
        .collect();
    ends.sort();
    let start = ends.first().copied().unwrap_or_else(|| *set.iter().min().unwrap());

    let (turning_point, _) = farthest_from(set, start);
    let (_, diameter) = farthest_from(set, turning_point);
    diameter
}
