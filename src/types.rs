use ndarray::{Array1, Array2};
use std::fmt;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every function in the public API returns `Result<T, MvqnError>`
/// instead of panicking.  Numerical degeneracy (a near-singular
/// observation Gram matrix) is deliberately *not* an error: the
/// accelerator curates its observation history before the compression
/// step consumes it, so the compressor trusts its inputs.
#[derive(Debug)]
pub enum MvqnError {
    /// Shape mismatch in input data (fatal — the algorithm cannot
    /// silently truncate or pad).
    Shape(String),
    /// An operation that needs secant observations was invoked with an
    /// empty observation history.
    EmptyObservationHistory,
    /// The accelerator has not seen a residual yet, so the problem size
    /// and Jacobian state are undefined.
    Uninitialized,
}

impl fmt::Display for MvqnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(msg) => write!(f, "shape error: {msg}"),
            Self::EmptyObservationHistory =>
                write!(f, "operation requires at least one secant observation pair"),
            Self::Uninitialized =>
                write!(f, "accelerator not initialized (no residual seen yet)"),
        }
    }
}

impl std::error::Error for MvqnError {}

// ─────────────────────────────────────────────────────────────
//  Settings
// ─────────────────────────────────────────────────────────────

/// Settings for the base multi-vector quasi-Newton accelerator.
#[derive(Debug, Clone)]
pub struct MvqnSettings {
    /// Relaxation factor ω₀ for the initial fixed-point iteration
    /// (used for the very first correction, before any Jacobian
    /// information exists).
    pub omega_0: f64,
    /// Absolute cut-off for the observation conditioning check: the
    /// newest observation column is dropped when the smallest singular
    /// value of V falls below `abs_cut_off` times the largest one.
    pub abs_cut_off: f64,
    /// Whether this accelerator is used inside the interface block
    /// Newton equations.  Selects the zero initial Jacobian convention
    /// instead of minus the identity.
    pub used_in_block_newton_equations: bool,
}

impl Default for MvqnSettings {
    fn default() -> Self {
        Self {
            omega_0: 0.825,
            abs_cut_off: 1.0e-8,
            used_in_block_newton_equations: false,
        }
    }
}

/// Policy for the lifetime of the random sketch matrix Ω.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmegaPolicy {
    /// Generate Ω once per accelerator lifetime and cache it.  It is
    /// still regenerated if the problem size changes between steps.
    CacheForever,
    /// Draw a fresh Ω at every compression pass.
    RegeneratePerStep,
}

/// Settings for the randomized-SVD variant.
#[derive(Debug, Clone)]
pub struct RandomizedSvdSettings {
    pub mvqn: MvqnSettings,
    /// Number of columns of the random sketch matrix Ω — the rank
    /// budget of the compressed Jacobian.  Clamped to the problem size
    /// when it exceeds it (the scheme degenerates to an exact
    /// representation in that case).
    pub num_modes: usize,
    /// Explicit seed for the sketch generator.  `None` seeds from the
    /// thread entropy source, making runs non-reproducible.
    pub seed: Option<u64>,
    pub omega_policy: OmegaPolicy,
    /// Collect per-step reconstruction diagnostics (orthonormality of
    /// the sketch basis and Frobenius error against the dense reference
    /// Jacobian).  Costs one dense n×n product per step — off by
    /// default.
    pub collect_diagnostics: bool,
}

impl Default for RandomizedSvdSettings {
    fn default() -> Self {
        Self {
            mvqn: MvqnSettings::default(),
            num_modes: 100,
            seed: None,
            omega_policy: OmegaPolicy::CacheForever,
            collect_diagnostics: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Low-rank factor pair
// ─────────────────────────────────────────────────────────────

/// Compressed representation of the previous-step inverse Jacobian.
///
/// The pair approximates `J − I`:  `J ≈ qu · sigma_v + I`.  Holding
/// both matrices in one struct (stored behind a single `Option`) makes
/// the both-valid-or-both-absent invariant structural — a reader can
/// never observe one factor without the other.
#[derive(Debug, Clone)]
pub struct LowRankFactors {
    /// Q·U — (problem_size × num_modes).
    pub qu: Array2<f64>,
    /// diag(σ)·Vᵗ — (num_modes × problem_size).
    pub sigma_v: Array2<f64>,
}

impl LowRankFactors {
    pub fn problem_size(&self) -> usize {
        self.qu.nrows()
    }

    pub fn num_modes(&self) -> usize {
        self.qu.ncols()
    }

    /// Materialize the approximate inverse Jacobian `qu·sigma_v + I`.
    /// Allocates a dense n×n matrix — diagnostic use only.
    pub fn reconstruct(&self) -> Array2<f64> {
        let mut jac = self.qu.dot(&self.sigma_v);
        for i in 0..jac.nrows() {
            jac[[i, i]] += 1.0;
        }
        jac
    }
}

// ─────────────────────────────────────────────────────────────
//  Diagnostics
// ─────────────────────────────────────────────────────────────

/// Per-step diagnostics from the compression pass, retained when
/// `collect_diagnostics` is enabled.
#[derive(Debug, Clone, Copy)]
pub struct JacobianDiagnostics {
    /// ‖QᵗQ − I‖_F of the orthonormal sketch basis.
    pub orthonormality_error: f64,
    /// ‖(QU·ΣV + I) − J_ref‖_F against the dense reference Jacobian
    /// maintained by the base accelerator.
    pub reconstruction_error: f64,
}

// ─────────────────────────────────────────────────────────────
//  Convergence accelerator interface
// ─────────────────────────────────────────────────────────────

/// The seam the coupling orchestration layer drives each accelerator
/// through.  One coupling time step is:
///
/// ```text
/// initialize_solution_step()
/// loop until converged {
///     update_solution(residual, &mut guess)
///     finalize_non_linear_iteration()
/// }
/// finalize_solution_step()
/// ```
pub trait ConvergenceAccelerator {
    /// Reset per-step state (iteration counter, secant history).
    fn initialize_solution_step(&mut self);

    /// Record the current (residual, guess) pair, refresh the inverse
    /// Jacobian approximation, and apply the correction to `guess` in
    /// place.
    fn update_solution(
        &mut self,
        residual: &Array1<f64>,
        guess: &mut Array1<f64>,
    ) -> Result<(), MvqnError>;

    /// Advance the coupling iteration counter.
    fn finalize_non_linear_iteration(&mut self);

    /// End-of-step bookkeeping: the current Jacobian approximation
    /// becomes the previous-step one for the next time step.
    fn finalize_solution_step(&mut self) -> Result<(), MvqnError>;

    /// Interface degree-of-freedom count, zero before the first
    /// residual is seen.
    fn problem_size(&self) -> usize;
}
