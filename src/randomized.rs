//! MVQN accelerator with randomized-SVD Jacobian compression.
//!
//! Within a time step this behaves exactly like the base accelerator.
//! At the end of the step it replaces the dense previous-step Jacobian
//! with a low-rank pair, built by sketching the implicit operator
//! `A = J − I` on a random subspace:
//!
//!  1. M = (VᵗV)⁻¹·Vᵗ
//!  2. Y = A·Ω                      (problem_size × num_modes sketch)
//!  3. Q·R = Y                      (orthonormal range basis)
//!  4. Φ = Qᵗ·A                     (num_modes × problem_size)
//!  5. Φ = U·Σ·Vᵗ                   (thin SVD of the small projection)
//!  6. QU = Q·U,   ΣV = diag(Σ)·Vᵗ
//!  7. swap the persisted factor pair (construct-then-swap, so no
//!     reader ever sees half of an update)
//!
//! Memory for the persisted state is O(problem_size × num_modes)
//! instead of the O(problem_size²) a dense previous-step Jacobian would
//! cost.

use crate::linalg::{
    frobenius_norm, gram_pseudo_inverse_projector, orthonormality_defect, qr_thin, svd_thin,
};
use crate::mvqn::MvqnAccelerator;
use crate::operator::{ImplicitJacobian, InitialJacobian};
use crate::types::{
    ConvergenceAccelerator, JacobianDiagnostics, LowRankFactors, MvqnError, OmegaPolicy,
    RandomizedSvdSettings,
};
use log::debug;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ─────────────────────────────────────────────────────────────
//  Accelerator
// ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RandomizedSvdAccelerator {
    settings: RandomizedSvdSettings,
    base: MvqnAccelerator,
    /// Random sketch matrix Ω (problem_size × num_modes), cached
    /// according to the configured [`OmegaPolicy`].
    omega: Option<Array2<f64>>,
    /// Compressed previous-step Jacobian.  `None` on the first step.
    factors: Option<LowRankFactors>,
    diagnostics: Option<JacobianDiagnostics>,
    rng: StdRng,
}

impl RandomizedSvdAccelerator {
    pub fn new(settings: RandomizedSvdSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let base = MvqnAccelerator::new(settings.mvqn.clone());
        Self {
            settings,
            base,
            omega: None,
            factors: None,
            diagnostics: None,
            rng,
        }
    }

    pub fn settings(&self) -> &RandomizedSvdSettings {
        &self.settings
    }

    /// The underlying dense MVQN accelerator.
    pub fn base(&self) -> &MvqnAccelerator {
        &self.base
    }

    /// The compressed previous-step Jacobian factors, if a compression
    /// pass has run.
    pub fn low_rank_factors(&self) -> Option<&LowRankFactors> {
        self.factors.as_ref()
    }

    /// The cached random sketch matrix Ω.
    pub fn sketch_matrix(&self) -> Option<&Array2<f64>> {
        self.omega.as_ref()
    }

    /// Diagnostics from the most recent compression pass.  `None`
    /// unless `collect_diagnostics` is enabled.
    pub fn last_diagnostics(&self) -> Option<&JacobianDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Materialize `QU·ΣV + I` from the persisted factors.  Allocates a
    /// dense n×n matrix — diagnostic use only.
    pub fn reconstructed_jacobian(&self) -> Option<Array2<f64>> {
        self.factors.as_ref().map(LowRankFactors::reconstruct)
    }

    /// Make sure Ω exists with the right shape, drawing fresh uniform
    /// [0, 1) samples when it is missing, stale, or the policy asks for
    /// a per-step redraw.
    fn ensure_omega(&mut self, n: usize, num_modes: usize) {
        let stale = match &self.omega {
            Some(omega) => omega.dim() != (n, num_modes),
            None => true,
        };
        if stale || self.settings.omega_policy == OmegaPolicy::RegeneratePerStep {
            let rng = &mut self.rng;
            self.omega = Some(Array2::from_shape_fn((n, num_modes), |_| rng.gen::<f64>()));
            debug!("generated random sketch matrix ({n} x {num_modes})");
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  ConvergenceAccelerator implementation
// ─────────────────────────────────────────────────────────────

impl ConvergenceAccelerator for RandomizedSvdAccelerator {
    fn initialize_solution_step(&mut self) {
        self.base.initialize_solution_step();
    }

    fn update_solution(
        &mut self,
        residual: &Array1<f64>,
        guess: &mut Array1<f64>,
    ) -> Result<(), MvqnError> {
        // The base class performs the dense in-step update; the
        // compression only concerns the persisted end-of-step state.
        self.base.update_solution(residual, guess)
    }

    fn finalize_non_linear_iteration(&mut self) {
        self.base.finalize_non_linear_iteration();
    }

    /// Run the base bookkeeping, then compress the accumulated secant
    /// information into a fresh low-rank factor pair.
    fn finalize_solution_step(&mut self) -> Result<(), MvqnError> {
        self.base.finalize_solution_step()?;

        let n = self.base.problem_size();
        if n == 0 || self.base.observations().is_empty() {
            debug!("no secant observations this step; keeping previous low-rank factors");
            return Ok(());
        }

        // Factors sized for a different interface are stale.
        if self.factors.as_ref().is_some_and(|f| f.problem_size() != n) {
            self.factors = None;
        }

        let num_modes = self.settings.num_modes.min(n);
        self.ensure_omega(n, num_modes);

        let m = gram_pseudo_inverse_projector(self.base.residual_observation_matrix());

        let (qu, sigma_v, basis_defect) = {
            let v = self.base.residual_observation_matrix();
            let w = self.base.solution_observation_matrix();
            let initial = InitialJacobian::select(
                self.factors.as_ref(),
                self.base.is_used_in_block_newton_equations(),
            );
            let operator = ImplicitJacobian::new(v, w, &m, initial)?;
            let omega = self.omega.as_ref().ok_or(MvqnError::Uninitialized)?;

            let sketch = operator.apply_right(omega)?;
            let (q, _) = qr_thin(&sketch);
            let phi = operator.apply_transpose_left(&q)?;

            let (u_svd, s_svd, vt_svd) = svd_thin(&phi);
            let qu = q.dot(&u_svd);
            let mut sigma_v = vt_svd;
            for i in 0..sigma_v.nrows() {
                let sigma = s_svd[i];
                for j in 0..sigma_v.ncols() {
                    sigma_v[[i, j]] *= sigma;
                }
            }

            let basis_defect = self
                .settings
                .collect_diagnostics
                .then(|| orthonormality_defect(&q));
            (qu, sigma_v, basis_defect)
        };

        if let Some(orthonormality_error) = basis_defect {
            let mut reconstructed = qu.dot(&sigma_v);
            for i in 0..n {
                reconstructed[[i, i]] += 1.0;
            }
            let reference = self
                .base
                .inverse_jacobian_approximation()
                .ok_or(MvqnError::Uninitialized)?;
            let reconstruction_error = frobenius_norm(&(&reconstructed - reference));
            debug!(
                "compression diagnostics: orthonormality error {orthonormality_error:.3e}, \
                 Jacobian reconstruction error {reconstruction_error:.3e}"
            );
            self.diagnostics = Some(JacobianDiagnostics {
                orthonormality_error,
                reconstruction_error,
            });
        }

        // Construct-then-swap: the old pair stays valid until the new
        // one is complete.
        self.factors = Some(LowRankFactors { qu, sigma_v });

        Ok(())
    }

    fn problem_size(&self) -> usize {
        self.base.problem_size()
    }
}
