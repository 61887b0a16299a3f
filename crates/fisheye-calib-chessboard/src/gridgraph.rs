use crate::params::GridGraphParams;
use crate::response::Corner;
use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
pub struct NodeNeighbor {
    pub index: usize,
    pub distance: f32,
}

/// Absolute difference between two undirected angles, in `[0, π/2]`.
fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let pi = std::f32::consts::PI;
    let d = (a - b).rem_euclid(pi);
    d.min(pi - d)
}

fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    params: &GridGraphParams,
) -> Option<f32> {
    let tol = params.orientation_tolerance_deg.to_radians();

    // 1. Adjacent checkerboard corners have swapped light diagonals.
    let orient = angle_diff_abs(corner.orientation, neighbor.orientation);
    if (std::f32::consts::FRAC_PI_2 - orient).abs() > tol {
        return None;
    }

    // 2. Spacing.
    let vec_to_neighbor = neighbor.position - corner.position;
    let distance = vec_to_neighbor.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    // 3. Grid edges run at ~45° to both light diagonals.
    let edge_angle = vec_to_neighbor.y.atan2(vec_to_neighbor.x);
    let expected = std::f32::consts::FRAC_PI_4;
    if (angle_diff_abs(corner.orientation, edge_angle) - expected).abs() > tol
        || (angle_diff_abs(neighbor.orientation, edge_angle) - expected).abs() > tol
    {
        return None;
    }
    Some(distance)
}

/// Undirected neighbour relations between candidate corners.
pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        let n = corners.len();
        let mut adjacency: Vec<Vec<NodeNeighbor>> = vec![Vec::new(); n];
        if n < 2 {
            return Self {
                neighbors: adjacency,
            };
        }

        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();

        for (i, corner) in corners.iter().enumerate() {
            let query_point = [corner.position.x, corner.position.y];
            let results = tree.nearest_n::<SquaredEuclidean>(&query_point, params.k_neighbors + 1);
            for nn in results.into_iter() {
                let j = nn.item as usize;
                if j == i {
                    continue;
                }
                if let Some(distance) = is_good_neighbor(corner, &corners[j], params) {
                    // Keep the relation symmetric.
                    for (a, b) in [(i, j), (j, i)] {
                        if !adjacency[a].iter().any(|e| e.index == b) {
                            adjacency[a].push(NodeNeighbor { index: b, distance });
                        }
                    }
                }
            }
        }

        for list in adjacency.iter_mut() {
            list.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            list.truncate(4);
        }

        Self {
            neighbors: adjacency,
        }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// Grid coordinates plus the local pixel step along each grid axis.
#[derive(Clone, Copy, Debug)]
struct Placement {
    i: i32,
    j: i32,
    u: Vector2<f32>,
    v: Vector2<f32>,
}

fn cross(a: &Vector2<f32>, b: &Vector2<f32>) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Assign integer `(i, j)` coordinates to a component by BFS.
///
/// The seed is the best-connected node closest to the component centroid.
/// Each node carries local axis vectors so the labelling follows the grid
/// through lens distortion. The labelling is right-handed in image space
/// (`u × v > 0` with y pointing down). Returns `None` when the component does
/// not form a consistent lattice.
pub fn assign_grid_coordinates(
    corners: &[Corner],
    graph: &GridGraph,
    component: &[usize],
    params: &GridGraphParams,
) -> Option<Vec<(usize, i32, i32)>> {
    let centroid = component
        .iter()
        .fold(Vector2::zeros(), |acc, &k| acc + corners[k].position.coords)
        / component.len() as f32;
    let max_degree = component
        .iter()
        .map(|&k| graph.neighbors[k].len())
        .max()?;
    let start = component
        .iter()
        .copied()
        .filter(|&k| graph.neighbors[k].len() == max_degree)
        .min_by(|&a, &b| {
            let da = (corners[a].position.coords - centroid).norm_squared();
            let db = (corners[b].position.coords - centroid).norm_squared();
            da.total_cmp(&db)
        })?;

    // Seed axes: the closest edge, and the most perpendicular other edge.
    let edges: Vec<Vector2<f32>> = graph.neighbors[start]
        .iter()
        .map(|nb| corners[nb.index].position - corners[start].position)
        .collect();
    let u = *edges.first()?;
    let mut v = *edges
        .iter()
        .skip(1)
        .min_by(|a, b| {
            let ca = (a.dot(&u) / (a.norm() * u.norm())).abs();
            let cb = (b.dot(&u) / (b.norm() * u.norm())).abs();
            ca.total_cmp(&cb)
        })?;
    let axis_tol = params.axis_tolerance_deg.to_radians();
    let cos_tol = axis_tol.cos();
    if (v.dot(&u) / (v.norm() * u.norm())).abs() > axis_tol.sin() {
        return None;
    }
    if cross(&u, &v) < 0.0 {
        v = -v;
    }

    let mut placement: HashMap<usize, Placement> = HashMap::new();
    let mut occupied: HashMap<(i32, i32), usize> = HashMap::new();
    let mut queue = VecDeque::new();
    placement.insert(start, Placement { i: 0, j: 0, u, v });
    occupied.insert((0, 0), start);
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        let here = placement[&node];
        for nb in &graph.neighbors[node] {
            let e = corners[nb.index].position - corners[node].position;
            let en = e.norm();
            let cu = e.dot(&here.u) / (en * here.u.norm());
            let cv = e.dot(&here.v) / (en * here.v.norm());

            let (di, dj, next) = if cu.abs() >= cv.abs() && cu.abs() >= cos_tol {
                let ratio = en / here.u.norm();
                if ratio > params.max_step_ratio || ratio < 1.0 / params.max_step_ratio {
                    continue;
                }
                let s = cu.signum();
                (s as i32, 0, Placement { u: e * s, ..here })
            } else if cv.abs() >= cos_tol {
                let ratio = en / here.v.norm();
                if ratio > params.max_step_ratio || ratio < 1.0 / params.max_step_ratio {
                    continue;
                }
                let s = cv.signum();
                (0, s as i32, Placement { v: e * s, ..here })
            } else {
                continue;
            };

            let coord = (here.i + di, here.j + dj);
            match (placement.get(&nb.index), occupied.get(&coord)) {
                (Some(p), _) => {
                    if (p.i, p.j) != coord {
                        debug!(
                            "grid conflict: corner {} labelled ({}, {}) and {:?}",
                            nb.index, p.i, p.j, coord
                        );
                        return None;
                    }
                }
                (None, Some(&other)) => {
                    debug!(
                        "grid conflict: cell {:?} claimed by corners {} and {}",
                        coord, other, nb.index
                    );
                    return None;
                }
                (None, None) => {
                    placement.insert(
                        nb.index,
                        Placement {
                            i: coord.0,
                            j: coord.1,
                            ..next
                        },
                    );
                    occupied.insert(coord, nb.index);
                    queue.push_back(nb.index);
                }
            }
        }
    }

    let mut coords: Vec<(usize, i32, i32)> =
        placement.into_iter().map(|(k, p)| (k, p.i, p.j)).collect();
    coords.sort_unstable_by_key(|&(_, i, j)| (j, i));
    Some(coords)
}
