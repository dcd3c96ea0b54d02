//! Implicit inverse-Jacobian operator.
//!
//! Represents the current-step inverse Jacobian *minus the identity*,
//! `A = J − I`, without ever materializing the problem_size² matrix:
//!
//!   J = Jₙ + (W − Jₙ·V)·M,        M = (VᵗV)⁻¹·Vᵗ
//!
//! where the previous-step Jacobian Jₙ is one of three conventions:
//! minus the identity (first step), zero (first step inside the
//! interface block Newton equations), or the compressed low-rank pair
//! `QU·ΣV + I` from the last compression pass.  Because W, V and the
//! low-rank factors all have few columns, applying A (or Aᵗ) to a tall
//! matrix reduces to a chain of small dense products.

use crate::types::{LowRankFactors, MvqnError};
use ndarray::Array2;

// ─────────────────────────────────────────────────────────────
//  Previous-step Jacobian convention
// ─────────────────────────────────────────────────────────────

/// The previous-step Jacobian convention, selected once per
/// compression pass from (has low-rank factors, is block-Newton).
#[derive(Debug, Clone, Copy)]
pub enum InitialJacobian<'a> {
    /// Jₙ = −I.  Standard first-step convention.
    MinusIdentity,
    /// Jₙ = 0.  First-step convention inside the block Newton
    /// equations.
    Zero,
    /// Jₙ = QU·ΣV + I from the previous compression pass.
    LowRank(&'a LowRankFactors),
}

impl<'a> InitialJacobian<'a> {
    /// Pick the convention for this pass.
    pub fn select(factors: Option<&'a LowRankFactors>, used_in_block_newton: bool) -> Self {
        match factors {
            Some(f) => Self::LowRank(f),
            None if used_in_block_newton => Self::Zero,
            None => Self::MinusIdentity,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Operator
// ─────────────────────────────────────────────────────────────

/// Borrowed view of everything needed to apply `A = J − I`: the secant
/// observation matrices, the pseudo-inverse projector M, and the
/// previous-step Jacobian convention.  Scoped to one compression pass,
/// so the borrows guarantee nothing mutates the history mid-pass.
#[derive(Debug)]
pub struct ImplicitJacobian<'a> {
    v: &'a Array2<f64>,
    w: &'a Array2<f64>,
    m: &'a Array2<f64>,
    initial: InitialJacobian<'a>,
}

impl<'a> ImplicitJacobian<'a> {
    /// Build the operator for one pass.
    ///
    /// `v` and `w` are the residual/solution observation matrices
    /// (problem_size × cols, equal shapes, cols ≥ 1) and `m` is the
    /// projector from [`crate::linalg::gram_pseudo_inverse_projector`]
    /// (cols × problem_size).
    pub fn new(
        v: &'a Array2<f64>,
        w: &'a Array2<f64>,
        m: &'a Array2<f64>,
        initial: InitialJacobian<'a>,
    ) -> Result<Self, MvqnError> {
        if v.ncols() == 0 {
            return Err(MvqnError::EmptyObservationHistory);
        }
        if v.dim() != w.dim() {
            return Err(MvqnError::Shape(format!(
                "observation matrices V {:?} and W {:?} must have equal shapes",
                v.dim(),
                w.dim()
            )));
        }
        if m.dim() != (v.ncols(), v.nrows()) {
            return Err(MvqnError::Shape(format!(
                "projector M has shape {:?}, expected ({}, {})",
                m.dim(),
                v.ncols(),
                v.nrows()
            )));
        }
        if let InitialJacobian::LowRank(f) = initial {
            if f.problem_size() != v.nrows() {
                return Err(MvqnError::Shape(format!(
                    "low-rank factors are sized for problem size {}, observations for {}",
                    f.problem_size(),
                    v.nrows()
                )));
            }
        }
        Ok(Self { v, w, m, initial })
    }

    pub fn problem_size(&self) -> usize {
        self.v.nrows()
    }

    /// `Y = A·X` for a tall matrix X (problem_size × p).
    ///
    /// Fails with a shape error when X's row count does not match the
    /// problem size.
    pub fn apply_right(&self, x: &Array2<f64>) -> Result<Array2<f64>, MvqnError> {
        let n = self.problem_size();
        if x.nrows() != n {
            return Err(MvqnError::Shape(format!(
                "right multiplication matrix has {} rows, expected the problem size {}",
                x.nrows(),
                n
            )));
        }

        let m_x = self.m.dot(x);
        let mut y = self.w.dot(&m_x);

        match self.initial {
            InitialJacobian::MinusIdentity => {
                let v_m_x = self.v.dot(&m_x);
                y += &v_m_x;
                y.scaled_add(-2.0, x);
            }
            InitialJacobian::Zero => {
                y -= x;
            }
            InitialJacobian::LowRank(f) => {
                let v_m_x = self.v.dot(&m_x);
                let sv_x = f.sigma_v.dot(x);
                let qu_sv_x = f.qu.dot(&sv_x);
                let sv_v_m_x = f.sigma_v.dot(&v_m_x);
                let qu_sv_v_m_x = f.qu.dot(&sv_v_m_x);
                y += &qu_sv_x;
                y -= &v_m_x;
                y -= &qu_sv_v_m_x;
            }
        }

        Ok(y)
    }

    /// `Y = Lᵗ·A` for a tall matrix L (problem_size × q), returned as
    /// (q × problem_size) — the transpose-side analogue of
    /// [`Self::apply_right`].
    pub fn apply_transpose_left(&self, l: &Array2<f64>) -> Result<Array2<f64>, MvqnError> {
        let n = self.problem_size();
        if l.nrows() != n {
            return Err(MvqnError::Shape(format!(
                "left multiplication matrix has {} rows, expected the problem size {}",
                l.nrows(),
                n
            )));
        }

        let lt = l.t();
        let lt_w = lt.dot(self.w);
        let mut y = lt_w.dot(self.m);

        match self.initial {
            InitialJacobian::MinusIdentity => {
                let lt_v_m = lt.dot(self.v).dot(self.m);
                y += &lt_v_m;
                y.scaled_add(-2.0, &lt);
            }
            InitialJacobian::Zero => {
                y -= &lt;
            }
            InitialJacobian::LowRank(f) => {
                let lt_v_m = lt.dot(self.v).dot(self.m);
                let lt_qu_sv = lt.dot(&f.qu).dot(&f.sigma_v);
                let lt_qu_sv_v_m = lt_qu_sv.dot(self.v).dot(self.m);
                y += &lt_qu_sv;
                y -= &lt_v_m;
                y -= &lt_qu_sv_v_m;
            }
        }

        Ok(y)
    }
}
