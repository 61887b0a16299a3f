use serde::{Deserialize, Serialize};

/// Stopping rules and damping of the fisheye solver.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverParams {
    /// Outer (intrinsics) iterations.
    pub max_iters: usize,
    /// Relative parameter step or relative cost improvement that counts as converged.
    pub epsilon: f64,
    /// Gauss-Newton iterations when re-estimating each view's pose.
    pub pose_iters: usize,
    /// Initial Levenberg-Marquardt damping, relative to the normal-matrix diagonal.
    pub initial_lambda: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iters: 30,
            epsilon: 1e-6,
            pose_iters: 20,
            initial_lambda: 1e-3,
        }
    }
}
