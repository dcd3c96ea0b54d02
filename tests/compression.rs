//! End-to-end tests for the randomized-SVD accelerator: drive whole
//! coupling steps through the [`ConvergenceAccelerator`] interface and
//! check the compressed previous-step Jacobian against dense
//! references.

use mvqn::linalg::{frobenius_norm, gram_pseudo_inverse_projector, qr_thin, svd_thin};
use mvqn::operator::{ImplicitJacobian, InitialJacobian};
use mvqn::types::{
    ConvergenceAccelerator, LowRankFactors, OmegaPolicy, RandomizedSvdSettings,
};
use mvqn::RandomizedSvdAccelerator;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
}

/// Run one coupling step: for each secant increment pair, feed the
/// accumulated residual and guess to the accelerator.  The residual
/// sequence realizes the columns of `v_cols` as observation increments
/// and the guess sequence the columns of `w_cols`.
fn drive_step(
    acc: &mut RandomizedSvdAccelerator,
    r0: &Array1<f64>,
    x0: &Array1<f64>,
    v_cols: &Array2<f64>,
    w_cols: &Array2<f64>,
) {
    acc.initialize_solution_step();
    let mut r = r0.clone();
    let mut x_in = x0.clone();
    let mut x = x_in.clone();
    acc.update_solution(&r, &mut x).unwrap();
    acc.finalize_non_linear_iteration();
    for k in 0..v_cols.ncols() {
        r = &r + &v_cols.column(k);
        x_in = &x_in + &w_cols.column(k);
        let mut x = x_in.clone();
        acc.update_solution(&r, &mut x).unwrap();
        acc.finalize_non_linear_iteration();
    }
    acc.finalize_solution_step().unwrap();
}

// ─────────────────────────────────────────────────────────────
//  Full-rank budget: compression is exact
// ─────────────────────────────────────────────────────────────

/// With as many modes as interface DOFs the low-rank pair reproduces
/// the dense Jacobian  J = −I + (W + V)·M  exactly.
#[test]
fn full_mode_budget_reproduces_dense_jacobian() {
    let v_cols = ndarray::array![
        [1.0, 0.0],
        [1.0, 0.0],
        [0.0, 1.0],
        [0.0, -1.0],
    ];
    let w_cols = ndarray::array![
        [1.0, 0.0],
        [0.0, 1.0],
        [0.0, 0.0],
        [0.0, 1.0],
    ];
    let r0 = ndarray::array![0.5, -0.25, 1.0, 0.75];
    let x0 = Array1::<f64>::zeros(4);

    let mut acc = RandomizedSvdAccelerator::new(RandomizedSvdSettings {
        num_modes: 4,
        seed: Some(7),
        collect_diagnostics: true,
        ..RandomizedSvdSettings::default()
    });
    drive_step(&mut acc, &r0, &x0, &v_cols, &w_cols);

    // Closed-form dense secant update from the same observations.
    let m = gram_pseudo_inverse_projector(&v_cols);
    let mut expected = (&w_cols + &v_cols).dot(&m);
    for i in 0..4 {
        expected[[i, i]] -= 1.0;
    }

    assert_eq!(acc.base().observations().num_observations(), 2);
    let dense = acc.base().inverse_jacobian_approximation().unwrap();
    assert!(frobenius_norm(&(dense - &expected)) < 1e-10);

    let reconstructed = acc.reconstructed_jacobian().unwrap();
    assert!(frobenius_norm(&(&reconstructed - &expected)) < 1e-8);

    let diag = acc.last_diagnostics().unwrap();
    assert!(diag.orthonormality_error < 1e-10);
    assert!(diag.reconstruction_error < 1e-8);
}

/// Compressing twice in a row from the same secant information must not
/// degrade the factors: with a full mode budget the reconstruction
/// error stays put.
#[test]
fn repeated_compression_does_not_drift() {
    let mut rng = StdRng::seed_from_u64(13);
    let n = 5;
    let v_cols = random_matrix(&mut rng, n, 3);
    let w_cols = random_matrix(&mut rng, n, 3);
    let r0 = Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0));
    let x0 = Array1::<f64>::zeros(n);

    let mut acc = RandomizedSvdAccelerator::new(RandomizedSvdSettings {
        num_modes: n,
        seed: Some(99),
        collect_diagnostics: true,
        ..RandomizedSvdSettings::default()
    });
    drive_step(&mut acc, &r0, &x0, &v_cols, &w_cols);
    let err_first = acc.last_diagnostics().unwrap().reconstruction_error;
    assert!(err_first < 1e-8);

    // Finalize again without new iterations: the factors are rebuilt
    // from their own previous value.
    acc.finalize_solution_step().unwrap();
    let err_second = acc.last_diagnostics().unwrap().reconstruction_error;
    assert!(err_second <= err_first + 1e-9);
}

// ─────────────────────────────────────────────────────────────
//  Low-rank operator: a small budget suffices
// ─────────────────────────────────────────────────────────────

/// When the implicit operator is exactly rank one (rank-one prior
/// factors and W = V, so the secant update cancels), a single mode
/// captures it to machine precision even for a large interface.
#[test]
fn rank_one_operator_is_captured_by_one_mode() {
    let mut rng = StdRng::seed_from_u64(3);
    let n = 50;
    let factors = LowRankFactors {
        qu: random_matrix(&mut rng, n, 1),
        sigma_v: random_matrix(&mut rng, 1, n),
    };
    let v = random_matrix(&mut rng, n, 2);
    let w = v.clone();
    let m = gram_pseudo_inverse_projector(&v);

    let op = ImplicitJacobian::new(&v, &w, &m, InitialJacobian::LowRank(&factors)).unwrap();
    let a_dense = op.apply_right(&Array2::eye(n)).unwrap();
    assert!(frobenius_norm(&a_dense) > 1e-3);

    // One random sketch column, one mode.
    let omega = random_matrix(&mut rng, n, 1);
    let sketch = op.apply_right(&omega).unwrap();
    let (q, _) = qr_thin(&sketch);
    let phi = op.apply_transpose_left(&q).unwrap();
    let (u_svd, s_svd, vt_svd) = svd_thin(&phi);
    let qu = q.dot(&u_svd);
    let mut sigma_v = vt_svd;
    for j in 0..n {
        sigma_v[[0, j]] *= s_svd[0];
    }

    let approx = qu.dot(&sigma_v);
    let rel = frobenius_norm(&(&approx - &a_dense)) / frobenius_norm(&a_dense);
    assert!(rel < 1e-8, "relative compression error {rel}");
}

// ─────────────────────────────────────────────────────────────
//  Reproducibility and sketch lifetime
// ─────────────────────────────────────────────────────────────

/// Two accelerators with the same explicit seed produce bitwise-close
/// factors for the same input sequence.
#[test]
fn explicit_seed_makes_runs_reproducible() {
    let mut rng = StdRng::seed_from_u64(77);
    let n = 8;
    let v_cols = random_matrix(&mut rng, n, 3);
    let w_cols = random_matrix(&mut rng, n, 3);
    let r0 = Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0));
    let x0 = Array1::<f64>::zeros(n);

    let settings = RandomizedSvdSettings {
        num_modes: 3,
        seed: Some(4242),
        omega_policy: OmegaPolicy::RegeneratePerStep,
        ..RandomizedSvdSettings::default()
    };
    let mut acc_a = RandomizedSvdAccelerator::new(settings.clone());
    let mut acc_b = RandomizedSvdAccelerator::new(settings);
    drive_step(&mut acc_a, &r0, &x0, &v_cols, &w_cols);
    drive_step(&mut acc_b, &r0, &x0, &v_cols, &w_cols);

    let ja = acc_a.reconstructed_jacobian().unwrap();
    let jb = acc_b.reconstructed_jacobian().unwrap();
    assert!(frobenius_norm(&(&ja - &jb)) < 1e-12);
}

/// Growing the interface between steps resets the accelerator, discards
/// the stale factors, and draws a sketch with the new dimensions.
#[test]
fn problem_size_change_resets_sketch_and_factors() {
    let mut rng = StdRng::seed_from_u64(55);
    let settings = RandomizedSvdSettings {
        num_modes: 4,
        seed: Some(1),
        ..RandomizedSvdSettings::default()
    };
    let mut acc = RandomizedSvdAccelerator::new(settings);

    let v3 = random_matrix(&mut rng, 3, 2);
    let w3 = random_matrix(&mut rng, 3, 2);
    let r0 = Array1::from_shape_fn(3, |_| rng.gen_range(-1.0..1.0));
    drive_step(&mut acc, &r0, &Array1::zeros(3), &v3, &w3);
    assert_eq!(acc.low_rank_factors().unwrap().problem_size(), 3);
    // num_modes is clamped to the interface size.
    assert_eq!(acc.low_rank_factors().unwrap().num_modes(), 3);
    assert_eq!(acc.sketch_matrix().unwrap().dim(), (3, 3));

    let v6 = random_matrix(&mut rng, 6, 2);
    let w6 = random_matrix(&mut rng, 6, 2);
    let r0 = Array1::from_shape_fn(6, |_| rng.gen_range(-1.0..1.0));
    drive_step(&mut acc, &r0, &Array1::zeros(6), &v6, &w6);
    assert_eq!(acc.problem_size(), 6);
    let factors = acc.low_rank_factors().unwrap();
    assert_eq!(factors.problem_size(), 6);
    assert_eq!(factors.num_modes(), 4);
    assert_eq!(acc.sketch_matrix().unwrap().dim(), (6, 4));
}

/// A step that converges on its very first iteration leaves no secant
/// observations; the previously compressed factors must survive it.
#[test]
fn empty_step_keeps_previous_factors() {
    let mut rng = StdRng::seed_from_u64(91);
    let n = 6;
    let v_cols = random_matrix(&mut rng, n, 2);
    let w_cols = random_matrix(&mut rng, n, 2);
    let r0 = Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0));
    let mut acc = RandomizedSvdAccelerator::new(RandomizedSvdSettings {
        num_modes: n,
        seed: Some(5),
        ..RandomizedSvdSettings::default()
    });
    drive_step(&mut acc, &r0, &Array1::zeros(n), &v_cols, &w_cols);
    let before = acc.reconstructed_jacobian().unwrap();

    acc.initialize_solution_step();
    let mut x = Array1::zeros(n);
    acc.update_solution(&r0, &mut x).unwrap();
    acc.finalize_non_linear_iteration();
    acc.finalize_solution_step().unwrap();

    let after = acc.reconstructed_jacobian().unwrap();
    assert!(frobenius_norm(&(&after - &before)) < 1e-12);
}
