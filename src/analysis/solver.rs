//! Bounded Levenberg–Marquardt least squares.
//!
//! Parameters with box constraints are optimised in an unbounded internal
//! space (`p = lo + (hi - lo)(sin q + 1) / 2`, and `p = lo - 1 + sqrt(q² + 1)`
//! for one-sided bounds), so every trial step stays feasible and the solver
//! itself never has to project.

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

use crate::config::SolverConfig;

// ---------------------------------------------------------------------------
// Problem definition
// ---------------------------------------------------------------------------

/// A model whose parameters are found by minimising `Σ rᵢ²`.
pub trait LeastSquaresProblem {
    /// Residuals `model(p) - data` for the external parameters `p`.
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// ∂rᵢ/∂pⱼ for the external parameters `p`.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64>;
}

/// Box constraint of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounds {
    Free,
    Lower(f64),
    Upper(f64),
    Range(f64, f64),
}

impl Bounds {
    fn to_internal(self, p: f64) -> f64 {
        match self {
            Bounds::Free => p,
            Bounds::Lower(lo) => {
                let t = (p - lo + 1.0).max(1.0);
                (t * t - 1.0).sqrt()
            }
            Bounds::Upper(hi) => {
                let t = (hi - p + 1.0).max(1.0);
                (t * t - 1.0).sqrt()
            }
            Bounds::Range(lo, hi) => {
                let s = (2.0 * (p - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0);
                s.asin()
            }
        }
    }

    fn to_external(self, q: f64) -> f64 {
        match self {
            Bounds::Free => q,
            Bounds::Lower(lo) => lo - 1.0 + (q * q + 1.0).sqrt(),
            Bounds::Upper(hi) => hi + 1.0 - (q * q + 1.0).sqrt(),
            Bounds::Range(lo, hi) => lo + (hi - lo) * (q.sin() + 1.0) / 2.0,
        }
    }

    /// dp/dq at internal value `q`.
    fn gradient(self, q: f64) -> f64 {
        match self {
            Bounds::Free => 1.0,
            Bounds::Lower(_) => q / (q * q + 1.0).sqrt(),
            Bounds::Upper(_) => -q / (q * q + 1.0).sqrt(),
            Bounds::Range(lo, hi) => (hi - lo) * q.cos() / 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Solver output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// One of the tolerance tests passed.
    Converged,
    /// The iteration budget ran out; the last accepted parameters are returned.
    MaxIterations,
    /// Residuals became non-finite.
    Diverged,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub params: DVector<f64>,
    pub sum_of_squares: f64,
    pub iterations: usize,
    pub termination: Termination,
}

// ---------------------------------------------------------------------------
// Levenberg–Marquardt
// ---------------------------------------------------------------------------

const LAMBDA_MAX: f64 = 1e16;

pub struct LevenbergMarquardt {
    config: SolverConfig,
}

impl LevenbergMarquardt {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Minimise `problem` from `initial`, honouring `bounds` (one per parameter).
    pub fn minimize<P: LeastSquaresProblem>(
        &self,
        problem: &P,
        initial: &DVector<f64>,
        bounds: &[Bounds],
    ) -> Solution {
        let n = initial.len();
        debug_assert_eq!(n, bounds.len(), "one bound per parameter");

        let max_iterations = if self.config.max_iterations == 0 {
            200 * (n + 1)
        } else {
            self.config.max_iterations
        };

        let external = |q: &DVector<f64>| {
            DVector::from_iterator(n, q.iter().zip(bounds).map(|(&v, b)| b.to_external(v)))
        };

        let mut q = DVector::from_iterator(
            n,
            initial.iter().zip(bounds).map(|(&v, b)| b.to_internal(v)),
        );
        let mut p = external(&q);
        let mut r = problem.residuals(&p);
        let mut cost = r.norm_squared();
        if !cost.is_finite() {
            return Solution {
                params: p,
                sum_of_squares: cost,
                iterations: 0,
                termination: Termination::Diverged,
            };
        }

        let mut lambda = self.config.initial_lambda;
        let mut iterations = 0;

        while iterations < max_iterations {
            iterations += 1;

            let mut jac = problem.jacobian(&p);
            for (j, b) in bounds.iter().enumerate() {
                let scale = b.gradient(q[j]);
                jac.column_mut(j).scale_mut(scale);
            }
            let jt = jac.transpose();
            let jtj = &jt * &jac;
            let grad = &jt * &r;

            if grad.amax() <= self.config.gtol {
                debug!("solver: gradient tolerance reached after {iterations} iterations");
                return Solution {
                    params: p,
                    sum_of_squares: cost,
                    iterations,
                    termination: Termination::Converged,
                };
            }

            // Inner loop: raise damping until a step lowers the cost.
            loop {
                let mut damped = jtj.clone();
                for j in 0..n {
                    let d = jtj[(j, j)].max(1e-12);
                    damped[(j, j)] += lambda * d;
                }
                let step = match damped.cholesky() {
                    Some(chol) => chol.solve(&(-&grad)),
                    None => {
                        lambda *= 10.0;
                        if lambda > LAMBDA_MAX {
                            return self.stalled(p, cost, iterations);
                        }
                        continue;
                    }
                };

                let q_trial = &q + &step;
                let p_trial = external(&q_trial);
                let r_trial = problem.residuals(&p_trial);
                let cost_trial = r_trial.norm_squared();
                trace!("solver: λ={lambda:.3e} cost={cost:.6e} trial={cost_trial:.6e}");

                if cost_trial.is_finite() && cost_trial < cost {
                    let reduction = (cost - cost_trial) / cost.max(f64::MIN_POSITIVE);
                    let small_step = step.norm() <= self.config.xtol * (q.norm() + self.config.xtol);
                    q = q_trial;
                    p = p_trial;
                    r = r_trial;
                    cost = cost_trial;
                    lambda = (lambda / 10.0).max(1e-15);

                    if reduction <= self.config.ftol || small_step {
                        debug!("solver: converged after {iterations} iterations, cost={cost:.6e}");
                        return Solution {
                            params: p,
                            sum_of_squares: cost,
                            iterations,
                            termination: Termination::Converged,
                        };
                    }
                    break;
                }

                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return self.stalled(p, cost, iterations);
                }
            }
        }

        Solution {
            params: p,
            sum_of_squares: cost,
            iterations,
            termination: Termination::MaxIterations,
        }
    }

    /// No damping produced descent: the current point is a local minimum as
    /// far as the solver can tell.
    fn stalled(&self, params: DVector<f64>, cost: f64, iterations: usize) -> Solution {
        let termination = if cost.is_finite() {
            Termination::Converged
        } else {
            Termination::Diverged
        };
        debug!("solver: damping exhausted after {iterations} iterations ({termination:?})");
        Solution {
            params,
            sum_of_squares: cost,
            iterations,
            termination,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// y = a·exp(b·x)
    struct Exponential {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for Exponential {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.x.len(),
                self.x.iter().zip(&self.y).map(|(x, y)| p[0] * (p[1] * x).exp() - y),
            )
        }

        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_fn(self.x.len(), 2, |i, j| {
                let e = (p[1] * self.x[i]).exp();
                if j == 0 {
                    e
                } else {
                    p[0] * self.x[i] * e
                }
            })
        }
    }

    fn exponential() -> Exponential {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y = x.iter().map(|x| 2.0 * (-1.5 * x).exp()).collect();
        Exponential { x, y }
    }

    #[test]
    fn bounds_roundtrip() {
        for (b, p) in [
            (Bounds::Free, -3.0),
            (Bounds::Lower(0.0), 4.0),
            (Bounds::Upper(1.0), -2.0),
            (Bounds::Range(-1.0, 5.0), 2.5),
        ] {
            assert_abs_diff_eq!(b.to_external(b.to_internal(p)), p, epsilon = 1e-12);
        }
        // Out-of-range starts are pulled onto the boundary.
        let b = Bounds::Range(0.0, 1.0);
        assert_abs_diff_eq!(b.to_external(b.to_internal(3.0)), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn fits_unbounded_exponential() {
        let problem = exponential();
        let solver = LevenbergMarquardt::new(SolverConfig::default());
        let sol = solver.minimize(&problem, &DVector::from_vec(vec![1.0, -1.0]), &[Bounds::Free; 2]);
        assert_eq!(sol.termination, Termination::Converged);
        assert_abs_diff_eq!(sol.params[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.params[1], -1.5, epsilon = 1e-6);
    }

    #[test]
    fn respects_bounds() {
        let problem = exponential();
        let solver = LevenbergMarquardt::new(SolverConfig::default());
        let bounds = [Bounds::Range(0.0, 1.0), Bounds::Free];
        let sol = solver.minimize(&problem, &DVector::from_vec(vec![0.5, -1.0]), &bounds);
        assert!(sol.params[0] <= 1.0 && sol.params[0] >= 0.0);
        assert!(sol.termination != Termination::Diverged);
    }

    #[test]
    fn deterministic() {
        let problem = exponential();
        let solver = LevenbergMarquardt::new(SolverConfig::default());
        let start = DVector::from_vec(vec![1.0, -0.5]);
        let a = solver.minimize(&problem, &start, &[Bounds::Free; 2]);
        let b = solver.minimize(&problem, &start, &[Bounds::Free; 2]);
        assert_eq!(a.params, b.params);
        assert_eq!(a.iterations, b.iterations);
    }
}
