//! Minimum-cost path search over per-frame candidate lattices
//!
//! Costs are always minimized. A node whose cost reaches [`FORBIDDEN_COST`]
//! is unreachable; a frame where every node is unreachable makes the whole
//! search fail with [`TrackError::TrackingInfeasible`] instead of returning
//! a path through forbidden nodes.
//!
//! [`viterbi_multi`] assigns K tracks at once by expanding the M candidates
//! of each frame into their C(M, K) increasing combinations and searching
//! over those.

use crate::{Result, TrackError};

/// Sentinel cost for impossible candidates and transitions
pub const FORBIDDEN_COST: f64 = 1e30;

/// Upper bound on candidate combinations per frame in [`viterbi_multi`]
pub const MAX_COMBINATIONS: f64 = 10_000_000.0;

/// Cost callbacks for single-track search
pub trait CostModel {
    fn num_frames(&self) -> usize;

    fn num_candidates(&self, frame: usize) -> usize;

    /// Cost of choosing `candidate` in `frame`
    fn local_cost(&self, frame: usize, candidate: usize) -> f64;

    /// Cost of moving from `previous` in `frame - 1` to `current` in `frame`
    fn transition_cost(&self, frame: usize, previous: usize, current: usize) -> f64;

    /// Receives the winning candidate of each frame after backtracking
    fn put_result(&mut self, frame: usize, candidate: usize);
}

/// Cost callbacks for simultaneous tracks
///
/// Every frame is treated as having the same number of candidates; frames
/// with fewer real candidates return [`FORBIDDEN_COST`] for the missing ones.
pub trait MultiCostModel {
    fn num_frames(&self) -> usize;

    fn local_cost(&self, frame: usize, candidate: usize, track: usize) -> f64;

    fn transition_cost(&self, frame: usize, previous: usize, current: usize, track: usize) -> f64;

    fn put_result(&mut self, frame: usize, candidate: usize, track: usize);
}

/// Cumulative costs and backpointers, allocated per search
struct TrackLattice {
    delta: Vec<Vec<f64>>,
    psi: Vec<Vec<usize>>,
}

impl TrackLattice {
    fn with_frames(num_frames: usize) -> Self {
        Self {
            delta: Vec::with_capacity(num_frames),
            psi: Vec::with_capacity(num_frames),
        }
    }

    fn push(&mut self, delta: Vec<f64>, psi: Vec<usize>) {
        self.delta.push(delta);
        self.psi.push(psi);
    }

    /// Best final node and its cost
    fn best_end(&self) -> Option<(usize, f64)> {
        self.delta.last()?.iter().copied().enumerate().fold(None, |best, (j, cost)| match best {
            Some((_, c)) if c <= cost => best,
            _ => Some((j, cost)),
        })
    }

    fn backtrack(&self, end: usize) -> Vec<usize> {
        let mut path = vec![0; self.delta.len()];
        let mut node = end;
        for t in (0..self.delta.len()).rev() {
            path[t] = node;
            if t > 0 {
                node = self.psi[t][node];
            }
        }
        path
    }
}

fn reachable(costs: &[f64]) -> bool {
    costs.iter().any(|&c| c < FORBIDDEN_COST)
}

/// Find the minimum-cost path and report it through `put_result`
///
/// `δ(t, j) = min_i [δ(t-1, i) + transition(t, i, j)] + local(t, j)`, with
/// backpointers kept for each node. Returns the total cost of the path.
///
/// # Errors
/// [`TrackError::TrackingInfeasible`] if some frame has no candidates or
/// only unreachable ones.
pub fn viterbi<M: CostModel + ?Sized>(model: &mut M) -> Result<f64> {
    let num_frames = model.num_frames();
    if num_frames == 0 {
        return Ok(0.0);
    }

    let mut lattice = TrackLattice::with_frames(num_frames);

    let first: Vec<f64> = (0..model.num_candidates(0)).map(|j| model.local_cost(0, j)).collect();
    if !reachable(&first) {
        tracing::warn!(frame = 0, "no reachable candidate in first frame");
        return Err(TrackError::TrackingInfeasible { frame: 0 });
    }
    lattice.push(first, Vec::new());

    for t in 1..num_frames {
        let previous = &lattice.delta[t - 1];
        let n = model.num_candidates(t);
        let mut delta = Vec::with_capacity(n);
        let mut psi = Vec::with_capacity(n);

        for j in 0..n {
            let mut best = (0, f64::INFINITY);
            for (i, &cost) in previous.iter().enumerate() {
                let total = cost + model.transition_cost(t, i, j);
                if total < best.1 {
                    best = (i, total);
                }
            }
            delta.push(best.1 + model.local_cost(t, j));
            psi.push(best.0);
        }

        if !reachable(&delta) {
            tracing::warn!(frame = t, candidates = n, "no finite-cost path reaches frame");
            return Err(TrackError::TrackingInfeasible { frame: t });
        }
        lattice.push(delta, psi);
    }

    let (end, cost) = lattice
        .best_end()
        .ok_or(TrackError::TrackingInfeasible { frame: num_frames - 1 })?;
    for (t, candidate) in lattice.backtrack(end).into_iter().enumerate() {
        model.put_result(t, candidate);
    }
    Ok(cost)
}

/// Binomial coefficient C(n, k) as a float, so large values can be compared
/// against [`MAX_COMBINATIONS`] without overflow
pub fn combinations(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64).round()
}

/// All strictly increasing index tuples of length `k` from `0..n`, in
/// lexicographic order
pub fn combination_indices(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k > n {
        return Vec::new();
    }
    let mut result = Vec::new();
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        result.push(current.clone());

        // Rightmost position that can still advance
        let Some(pos) = (0..k).rev().find(|&i| current[i] < n - k + i) else {
            break;
        };
        current[pos] += 1;
        for i in pos + 1..k {
            current[i] = current[i - 1] + 1;
        }
    }
    result
}

/// Adapts a multi-track model to single-track search over combinations
struct CombinationModel<'a, M: ?Sized> {
    model: &'a mut M,
    combinations: Vec<Vec<usize>>,
}

impl<M: MultiCostModel + ?Sized> CostModel for CombinationModel<'_, M> {
    fn num_frames(&self) -> usize {
        self.model.num_frames()
    }

    fn num_candidates(&self, _frame: usize) -> usize {
        self.combinations.len()
    }

    fn local_cost(&self, frame: usize, candidate: usize) -> f64 {
        self.combinations[candidate]
            .iter()
            .enumerate()
            .map(|(track, &c)| self.model.local_cost(frame, c, track))
            .sum::<f64>()
            .min(FORBIDDEN_COST)
    }

    fn transition_cost(&self, frame: usize, previous: usize, current: usize) -> f64 {
        self.combinations[previous]
            .iter()
            .zip(&self.combinations[current])
            .enumerate()
            .map(|(track, (&p, &c))| self.model.transition_cost(frame, p, c, track))
            .sum::<f64>()
            .min(FORBIDDEN_COST)
    }

    fn put_result(&mut self, frame: usize, candidate: usize) {
        for (track, &c) in self.combinations[candidate].iter().enumerate() {
            self.model.put_result(frame, c, track);
        }
    }
}

/// Assign `num_tracks` tracks to `num_candidates` candidates per frame
///
/// Track k always receives a lower candidate index than track k + 1.
///
/// # Errors
/// - [`TrackError::TooManyTracks`] if `num_tracks` exceeds `num_candidates`
/// - [`TrackError::CombinatorialOverflow`] if C(M, K) exceeds [`MAX_COMBINATIONS`]
/// - [`TrackError::TrackingInfeasible`] as for [`viterbi`]
pub fn viterbi_multi<M: MultiCostModel + ?Sized>(
    model: &mut M,
    num_candidates: usize,
    num_tracks: usize,
) -> Result<f64> {
    if num_tracks == 0 || num_tracks > num_candidates {
        return Err(TrackError::TooManyTracks {
            tracks: num_tracks,
            candidates: num_candidates,
        });
    }

    let count = combinations(num_candidates, num_tracks);
    if count > MAX_COMBINATIONS {
        tracing::warn!(
            candidates = num_candidates,
            tracks = num_tracks,
            combinations = count,
            "too many candidate combinations"
        );
        return Err(TrackError::CombinatorialOverflow {
            candidates: num_candidates,
            tracks: num_tracks,
            combinations: count,
        });
    }

    let mut adapter = CombinationModel {
        model,
        combinations: combination_indices(num_candidates, num_tracks),
    };
    viterbi(&mut adapter)
}
