//! Secant observation store: the paired residual-update (V) and
//! solution-update (W) column matrices accumulated across coupling
//! iterations.
//!
//! Invariant: V and W always share the same column count, and columns
//! are ordered oldest → newest.  The store is append-only during a
//! coupling iteration; the accelerator may drop the newest column after
//! a conditioning check, or the oldest one to cap the history length.

use crate::types::MvqnError;
use ndarray::{concatenate, s, Array1, Array2, Axis};

#[derive(Debug, Clone)]
pub struct ObservationStore {
    problem_size: usize,
    /// Residual differences Δr, one column per retained iteration.
    v: Array2<f64>,
    /// Solution differences Δx, paired column-for-column with `v`.
    w: Array2<f64>,
}

impl ObservationStore {
    pub fn new(problem_size: usize) -> Self {
        Self {
            problem_size,
            v: Array2::zeros((problem_size, 0)),
            w: Array2::zeros((problem_size, 0)),
        }
    }

    pub fn problem_size(&self) -> usize {
        self.problem_size
    }

    pub fn num_observations(&self) -> usize {
        self.v.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.v.ncols() == 0
    }

    /// Residual observation matrix V (problem_size × num_observations).
    pub fn residual_matrix(&self) -> &Array2<f64> {
        &self.v
    }

    /// Solution observation matrix W (problem_size × num_observations).
    pub fn solution_matrix(&self) -> &Array2<f64> {
        &self.w
    }

    /// Append one secant pair (Δr, Δx) as the newest column.
    pub fn push(&mut self, dr: &Array1<f64>, dx: &Array1<f64>) -> Result<(), MvqnError> {
        if dr.len() != self.problem_size || dx.len() != self.problem_size {
            return Err(MvqnError::Shape(format!(
                "observation pair lengths ({}, {}) do not match the problem size {}",
                dr.len(),
                dx.len(),
                self.problem_size
            )));
        }
        let dr_col = dr.view().insert_axis(Axis(1));
        let dx_col = dx.view().insert_axis(Axis(1));
        self.v = concatenate![Axis(1), self.v.view(), dr_col];
        self.w = concatenate![Axis(1), self.w.view(), dx_col];
        Ok(())
    }

    /// Drop the newest column of both matrices (conditioning cut-off).
    pub fn drop_newest(&mut self) {
        let cols = self.v.ncols();
        if cols == 0 {
            return;
        }
        self.v = self.v.slice(s![.., ..cols - 1]).to_owned();
        self.w = self.w.slice(s![.., ..cols - 1]).to_owned();
    }

    /// Drop the oldest column of both matrices (history cap).
    pub fn drop_oldest(&mut self) {
        if self.v.ncols() == 0 {
            return;
        }
        self.v = self.v.slice(s![.., 1..]).to_owned();
        self.w = self.w.slice(s![.., 1..]).to_owned();
    }

    pub fn clear(&mut self) {
        self.v = Array2::zeros((self.problem_size, 0));
        self.w = Array2::zeros((self.problem_size, 0));
    }
}
