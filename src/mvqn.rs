//! Base multi-vector quasi-Newton (MVQN) convergence accelerator with a
//! full dense inverse-Jacobian approximation (Bogaers et al. 2016).
//!
//! Each coupling iteration appends one secant pair to the observation
//! store and refreshes the dense approximation
//!
//!   J_k1 = Jₙ + (W − Jₙ·V)·(VᵗV)⁻¹·Vᵗ
//!
//! which is then used to correct the interface guess,  x ← x − J_k1·r.
//! The very first correction ever is the relaxed fixed point
//! x ← x + ω₀·r, since no Jacobian information exists yet.
//!
//! The dense J_k1 is O(n²) in memory — the randomized-SVD variant in
//! [`crate::randomized`] exists to replace the *persisted* previous-step
//! Jacobian with a low-rank pair.

use crate::linalg::{gram_pseudo_inverse_projector, svd_thin};
use crate::observation::ObservationStore;
use crate::types::{ConvergenceAccelerator, MvqnError, MvqnSettings};
use log::{debug, warn};
use ndarray::{Array1, Array2};

// ─────────────────────────────────────────────────────────────
//  Accelerator state
// ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MvqnAccelerator {
    settings: MvqnSettings,
    /// Interface DOF count; 0 until the first residual is seen.
    problem_size: usize,
    /// Coupling iteration counter within the current time step.
    iteration: usize,
    first_correction_performed: bool,
    jacobians_initialized: bool,
    residual_prev: Option<Array1<f64>>,
    guess_prev: Option<Array1<f64>>,
    observations: ObservationStore,
    /// Previous-step inverse Jacobian Jₙ.
    jac_n: Option<Array2<f64>>,
    /// Current-step inverse Jacobian approximation J_k1.
    jac_k1: Option<Array2<f64>>,
}

impl MvqnAccelerator {
    pub fn new(settings: MvqnSettings) -> Self {
        Self {
            settings,
            problem_size: 0,
            iteration: 0,
            first_correction_performed: false,
            jacobians_initialized: false,
            residual_prev: None,
            guess_prev: None,
            observations: ObservationStore::new(0),
            jac_n: None,
            jac_k1: None,
        }
    }

    pub fn settings(&self) -> &MvqnSettings {
        &self.settings
    }

    pub fn is_used_in_block_newton_equations(&self) -> bool {
        self.settings.used_in_block_newton_equations
    }

    pub fn observations(&self) -> &ObservationStore {
        &self.observations
    }

    /// Residual observation matrix V of the current step.
    pub fn residual_observation_matrix(&self) -> &Array2<f64> {
        self.observations.residual_matrix()
    }

    /// Solution observation matrix W of the current step.
    pub fn solution_observation_matrix(&self) -> &Array2<f64> {
        self.observations.solution_matrix()
    }

    /// The dense inverse-Jacobian approximation of the current step —
    /// the reference against which randomized reconstructions are
    /// compared.
    pub fn inverse_jacobian_approximation(&self) -> Option<&Array2<f64>> {
        self.jac_k1.as_ref()
    }

    /// Previous-step inverse Jacobian Jₙ.
    pub fn previous_step_jacobian(&self) -> Option<&Array2<f64>> {
        self.jac_n.as_ref()
    }

    /// Discard all state and restart with a new interface size.
    fn reset(&mut self, problem_size: usize) {
        self.problem_size = problem_size;
        self.iteration = 0;
        self.first_correction_performed = false;
        self.jacobians_initialized = false;
        self.residual_prev = None;
        self.guess_prev = None;
        self.observations = ObservationStore::new(problem_size);
        self.jac_n = None;
        self.jac_k1 = None;
    }

    /// Initialize Jₙ for the very first time step: minus the identity,
    /// or the zero matrix when the accelerator sits inside the
    /// interface block Newton equations.
    fn initialize_jacobians(&mut self) {
        let n = self.problem_size;
        let jac_n = if self.settings.used_in_block_newton_equations {
            Array2::zeros((n, n))
        } else {
            debug!("previous step Jacobian initialized as minus the identity");
            let mut eye = Array2::<f64>::eye(n);
            eye *= -1.0;
            eye
        };
        self.jac_k1 = Some(jac_n.clone());
        self.jac_n = Some(jac_n);
        self.jacobians_initialized = true;
    }

    /// Drop the newest observation column when the residual history
    /// becomes numerically collinear.  The singular values of V are the
    /// square roots of the eigenvalues of the Gram matrix VᵗV.
    fn apply_conditioning_cut_off(&mut self) {
        let v = self.observations.residual_matrix();
        if v.ncols() < 2 {
            return;
        }
        let gram = v.t().dot(v);
        let (_, eigs, _) = svd_thin(&gram);
        let max_sv = eigs[0].sqrt();
        let min_sv = eigs[eigs.len() - 1].sqrt();
        if min_sv < self.settings.abs_cut_off * max_sv {
            warn!(
                "dropping newest observation column: residual observation matrix min. \
                 singular value {:.3e} below tolerance {:.3e}",
                min_sv,
                self.settings.abs_cut_off * max_sv
            );
            self.observations.drop_newest();
        }
    }

    /// Dense secant update  J_k1 = Jₙ + (W − Jₙ·V)·M.
    fn refresh_jacobian(&mut self) -> Result<(), MvqnError> {
        if self.observations.is_empty() {
            self.jac_k1 = self.jac_n.clone();
            return Ok(());
        }
        let v = self.observations.residual_matrix();
        let w = self.observations.solution_matrix();
        let m = gram_pseudo_inverse_projector(v);
        let jac_n = self.jac_n.as_ref().ok_or(MvqnError::Uninitialized)?;
        let secant = (w - &jac_n.dot(v)).dot(&m);
        self.jac_k1 = Some(jac_n + &secant);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  ConvergenceAccelerator implementation
// ─────────────────────────────────────────────────────────────

impl ConvergenceAccelerator for MvqnAccelerator {
    fn initialize_solution_step(&mut self) {
        self.iteration = 0;
        self.residual_prev = None;
        self.guess_prev = None;
        self.observations.clear();
    }

    fn update_solution(
        &mut self,
        residual: &Array1<f64>,
        guess: &mut Array1<f64>,
    ) -> Result<(), MvqnError> {
        if residual.len() != guess.len() {
            return Err(MvqnError::Shape(format!(
                "residual length {} does not match iteration guess length {}",
                residual.len(),
                guess.len()
            )));
        }
        if self.problem_size == 0 {
            self.reset(residual.len());
        } else if residual.len() != self.problem_size {
            warn!(
                "interface problem size changed from {} to {}; discarding accelerator state",
                self.problem_size,
                residual.len()
            );
            self.reset(residual.len());
        }

        if self.iteration == 0 {
            if !self.jacobians_initialized {
                self.initialize_jacobians();
            } else {
                // The first iteration of a later step runs with the
                // previous-step Jacobian.
                self.jac_k1 = self.jac_n.clone();
            }
        } else {
            let r_prev = self.residual_prev.as_ref().ok_or(MvqnError::Uninitialized)?;
            let x_prev = self.guess_prev.as_ref().ok_or(MvqnError::Uninitialized)?;
            let dr = residual - r_prev;
            let dx = &*guess - x_prev;
            self.observations.push(&dr, &dx)?;
            // Never retain more secant pairs than interface DOFs.
            while self.observations.num_observations() > self.problem_size {
                self.observations.drop_oldest();
            }
            self.apply_conditioning_cut_off();
            self.refresh_jacobian()?;
        }

        self.residual_prev = Some(residual.clone());
        self.guess_prev = Some(guess.clone());

        if !self.first_correction_performed {
            // Relaxed fixed-point correction, x ← x + ω₀·r.
            guess.scaled_add(self.settings.omega_0, residual);
            self.first_correction_performed = true;
        } else {
            let jac = self.jac_k1.as_ref().ok_or(MvqnError::Uninitialized)?;
            let correction = jac.dot(residual);
            *guess -= &correction;
        }

        Ok(())
    }

    fn finalize_non_linear_iteration(&mut self) {
        self.iteration += 1;
    }

    fn finalize_solution_step(&mut self) -> Result<(), MvqnError> {
        // Current approximation becomes the previous-step Jacobian.
        if self.jac_k1.is_some() {
            self.jac_n = self.jac_k1.clone();
        }
        Ok(())
    }

    fn problem_size(&self) -> usize {
        self.problem_size
    }
}
