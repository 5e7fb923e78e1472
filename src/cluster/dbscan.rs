//! Density-based spatial clustering (DBSCAN) over report coordinates.
//!
//! Classic label-propagation DBSCAN with a haversine metric. The linear
//! region query is adequate for the bounded recent window the engine
//! feeds it; swapping in a spatial index changes complexity, not results.
//!
//! Determinism: callers pass points sorted by ascending report id, and
//! expansion visits neighbors in that order, so a border point within
//! epsilon of two clusters always joins the cluster whose core point was
//! discovered first.

use crate::geo;
use crate::reports::EligibleReport;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// DBSCAN run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbscanParams {
    /// Neighborhood radius in meters.
    pub epsilon_meters: f64,
    /// Minimum neighbors (including the point itself) for a core point.
    pub min_samples: usize,
}

const UNCLASSIFIED: i64 = -2;
const NOISE: i64 = -1;

/// Group points into clusters. Returns member indices per cluster, in
/// cluster discovery order; noise points appear in no cluster.
pub(crate) fn cluster(points: &[EligibleReport], params: &DbscanParams) -> Vec<Vec<usize>> {
    let mut assignment = vec![UNCLASSIFIED; points.len()];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for i in 0..points.len() {
        if assignment[i] != UNCLASSIFIED {
            continue;
        }

        let neighbors = region_query(points, i, params.epsilon_meters);
        if neighbors.len() < params.min_samples {
            assignment[i] = NOISE;
            continue;
        }

        // New cluster seeded from core point i
        let cluster_id = clusters.len() as i64;
        let mut members = vec![i];
        assignment[i] = cluster_id;

        let mut frontier: VecDeque<usize> = neighbors.into_iter().filter(|&j| j != i).collect();
        while let Some(j) = frontier.pop_front() {
            if assignment[j] == NOISE {
                // Former noise point becomes a border member
                assignment[j] = cluster_id;
                members.push(j);
                continue;
            }
            if assignment[j] != UNCLASSIFIED {
                continue;
            }
            assignment[j] = cluster_id;
            members.push(j);

            let j_neighbors = region_query(points, j, params.epsilon_meters);
            if j_neighbors.len() >= params.min_samples {
                // j is core: its neighborhood joins the frontier
                frontier.extend(j_neighbors);
            }
        }

        members.sort_unstable();
        clusters.push(members);
    }

    clusters
}

/// Indices within epsilon of point `i`, including `i` itself, in
/// ascending index order.
fn region_query(points: &[EligibleReport], i: usize, epsilon_meters: f64) -> Vec<usize> {
    let center = points[i].location;
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| geo::haversine_meters(center, p.location) <= epsilon_meters)
        .map(|(j, _)| j)
        .collect()
}
