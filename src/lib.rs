//! **mvqn** — multi-vector quasi-Newton convergence acceleration for
//! partitioned FSI coupling, with randomized-SVD Jacobian compression.
//!
//! This crate implements the complete acceleration pipeline:
//!
//! 1. **Observation store** (`observation`): paired secant history (V, W).
//! 2. **Decompositions** (`linalg`): Householder QR, Jacobi thin SVD,
//!    pseudo-inverse projector (VᵗV)⁻¹·Vᵗ.
//! 3. **Base accelerator** (`mvqn`): dense inverse-Jacobian secant update
//!    and in-iteration solution correction.
//! 4. **Implicit operator** (`operator`): matrix-free application of
//!    J − I and its transpose.
//! 5. **Compressor** (`randomized`): end-of-step randomized truncated SVD
//!    producing the persisted low-rank (QU, ΣV) pair.

pub mod linalg;
pub mod mvqn;
pub mod observation;
pub mod operator;
pub mod randomized;
pub mod types;

pub use mvqn::MvqnAccelerator;
pub use randomized::RandomizedSvdAccelerator;
pub use types::{
    ConvergenceAccelerator, JacobianDiagnostics, LowRankFactors, MvqnError, MvqnSettings,
    OmegaPolicy, RandomizedSvdSettings,
};
