//! Dense decomposition primitives: Householder QR with thin-Q extraction,
//! one-sided Jacobi (Hestenes) thin SVD, and the pseudo-inverse projector
//! M = (VᵗV)⁻¹·Vᵗ used by the secant update.
//!
//! All routines operate on `ndarray` matrices and are sized for the
//! accelerator's workloads: the tall factors have at most a few hundred
//! columns, and every square decomposition runs on a small matrix (the
//! observation Gram matrix or the projected operator), never on the
//! problem_size × problem_size Jacobian itself.

use ndarray::{Array1, Array2};

// ─────────────────────────────────────────────────────────────
//  Householder QR  (thin Q)
// ─────────────────────────────────────────────────────────────

/// Thin QR decomposition of a tall matrix `a` (n × k, n ≥ k).
///
/// Returns `(Q, R)` with Q (n × k) carrying orthonormal columns and
/// R (k × k) upper triangular such that `a = Q·R`.
///
/// Q is a product of Householder reflectors applied to the first k
/// identity columns, so its columns stay orthonormal even when `a` is
/// rank deficient.
pub fn qr_thin(a: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (n, k) = a.dim();
    debug_assert!(n >= k, "qr_thin requires a tall matrix, got {n}x{k}");

    let mut r = a.clone();
    // Reflector j stored as (v, ‖v‖²) acting on rows j..n; `None` marks
    // an already-zero column (identity reflector).
    let mut reflectors: Vec<Option<(Array1<f64>, f64)>> = Vec::with_capacity(k);

    for j in 0..k {
        let mut v = Array1::<f64>::zeros(n - j);
        for i in j..n {
            v[i - j] = r[[i, j]];
        }
        let norm = v.dot(&v).sqrt();
        if norm == 0.0 {
            reflectors.push(None);
            continue;
        }
        let alpha = if v[0] >= 0.0 { -norm } else { norm };
        v[0] -= alpha;
        let v_norm2 = v.dot(&v);
        if v_norm2 == 0.0 {
            reflectors.push(None);
            continue;
        }
        // Apply  H = I − 2vvᵗ/‖v‖²  to the trailing block of R.
        for c in j..k {
            let mut dot = 0.0;
            for i in j..n {
                dot += v[i - j] * r[[i, c]];
            }
            let f = 2.0 * dot / v_norm2;
            for i in j..n {
                r[[i, c]] -= f * v[i - j];
            }
        }
        r[[j, j]] = alpha;
        for i in (j + 1)..n {
            r[[i, j]] = 0.0;
        }
        reflectors.push(Some((v, v_norm2)));
    }

    // Accumulate Q = H₀·H₁·…·H_{k−1}·E by applying the reflectors in
    // reverse order to the n × k identity block E.
    let mut q = Array2::<f64>::zeros((n, k));
    for j in 0..k {
        q[[j, j]] = 1.0;
    }
    for (j, reflector) in reflectors.iter().enumerate().rev() {
        let Some((v, v_norm2)) = reflector else { continue };
        for c in 0..k {
            let mut dot = 0.0;
            for i in j..n {
                dot += v[i - j] * q[[i, c]];
            }
            let f = 2.0 * dot / v_norm2;
            for i in j..n {
                q[[i, c]] -= f * v[i - j];
            }
        }
    }

    let mut r_thin = Array2::<f64>::zeros((k, k));
    for i in 0..k {
        for j in i..k {
            r_thin[[i, j]] = r[[i, j]];
        }
    }
    (q, r_thin)
}

// ─────────────────────────────────────────────────────────────
//  Thin SVD  (one-sided Jacobi)
// ─────────────────────────────────────────────────────────────

const JACOBI_MAX_SWEEPS: usize = 60;
const JACOBI_REL_TOL: f64 = 1.0e-14;

/// Thin SVD of an arbitrary dense matrix `a` (m × n):
/// `a = U · diag(s) · Vᵗ` with economy sizes
/// U (m × p), s (p), Vᵗ (p × n), where p = min(m, n).
///
/// Singular values come out sorted in descending order.  Wide inputs
/// are factored through their transpose, so the iteration always runs
/// on the tall orientation.
pub fn svd_thin(a: &Array2<f64>) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let (m, n) = a.dim();
    if m >= n {
        jacobi_svd_tall(a)
    } else {
        // a = (aᵗ)ᵗ = (U' Σ V'ᵗ)ᵗ = V' Σ U'ᵗ
        let (u_t, s, vt_t) = jacobi_svd_tall(&a.t().to_owned());
        (vt_t.t().to_owned(), s, u_t.t().to_owned())
    }
}

/// One-sided Jacobi SVD for a tall matrix (m ≥ n).  Columns of the
/// working copy are rotated pairwise until mutually orthogonal; their
/// norms are the singular values and the accumulated rotations give V.
fn jacobi_svd_tall(a: &Array2<f64>) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let (m, n) = a.dim();
    debug_assert!(m >= n);

    let mut u = a.clone();
    let mut v = Array2::<f64>::eye(n);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut rotated = false;
        for p in 0..n {
            for q in (p + 1)..n {
                let mut alpha = 0.0;
                let mut beta = 0.0;
                let mut gamma = 0.0;
                for i in 0..m {
                    let up = u[[i, p]];
                    let uq = u[[i, q]];
                    alpha += up * up;
                    beta += uq * uq;
                    gamma += up * uq;
                }
                if alpha == 0.0 || beta == 0.0 {
                    continue;
                }
                if gamma.abs() <= JACOBI_REL_TOL * (alpha * beta).sqrt() {
                    continue;
                }
                rotated = true;

                // Rotation angle zeroing the (p,q) inner product:
                // t is the smaller-magnitude root of t² + 2ζt − 1 = 0.
                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;

                for i in 0..m {
                    let up = u[[i, p]];
                    let uq = u[[i, q]];
                    u[[i, p]] = c * up - s * uq;
                    u[[i, q]] = s * up + c * uq;
                }
                for i in 0..n {
                    let vp = v[[i, p]];
                    let vq = v[[i, q]];
                    v[[i, p]] = c * vp - s * vq;
                    v[[i, q]] = s * vp + c * vq;
                }
            }
        }
        if !rotated {
            break;
        }
    }

    // Column norms are the singular values; normalize the left vectors.
    let mut s = Array1::<f64>::zeros(n);
    for j in 0..n {
        let mut norm2 = 0.0;
        for i in 0..m {
            norm2 += u[[i, j]] * u[[i, j]];
        }
        let sigma = norm2.sqrt();
        s[j] = sigma;
        if sigma > 0.0 {
            for i in 0..m {
                u[[i, j]] /= sigma;
            }
        }
    }

    // Sort descending by singular value.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| s[j].partial_cmp(&s[i]).unwrap_or(std::cmp::Ordering::Equal));

    let mut u_sorted = Array2::<f64>::zeros((m, n));
    let mut s_sorted = Array1::<f64>::zeros(n);
    let mut vt_sorted = Array2::<f64>::zeros((n, n));
    for (new_j, &old_j) in order.iter().enumerate() {
        s_sorted[new_j] = s[old_j];
        for i in 0..m {
            u_sorted[[i, new_j]] = u[[i, old_j]];
        }
        for i in 0..n {
            vt_sorted[[new_j, i]] = v[[i, old_j]];
        }
    }

    (u_sorted, s_sorted, vt_sorted)
}

// ─────────────────────────────────────────────────────────────
//  Pseudo-inverse projector  M = (VᵗV)⁻¹ · Vᵗ
// ─────────────────────────────────────────────────────────────

/// Compute the auxiliary projector `M = (VᵗV)⁻¹ · Vᵗ` (cols × n) from
/// the residual observation matrix V (n × cols).
///
/// The small square Gram matrix VᵗV is factored by SVD and inverted via
/// Σ⁻¹ reconstruction — no explicit inversion routine.  There is no
/// rank-deficiency guard here: the accelerator drops near-dependent
/// observation columns before this routine runs, and a singular Gram
/// matrix produces a mathematically invalid (infinite) result rather
/// than an error.
pub fn gram_pseudo_inverse_projector(v_obs: &Array2<f64>) -> Array2<f64> {
    let cols = v_obs.ncols();
    let gram = v_obs.t().dot(v_obs);

    let (u_svd, s_svd, vt_svd) = svd_thin(&gram);

    //  (VᵗV)⁻¹ = Σⱼ (1/σⱼ) vⱼ uⱼᵗ
    let mut gram_inv = Array2::<f64>::zeros((cols, cols));
    for j in 0..cols {
        for i in 0..cols {
            let aux = vt_svd[[j, i]] / s_svd[j];
            for k in 0..cols {
                gram_inv[[i, k]] += aux * u_svd[[k, j]];
            }
        }
    }

    gram_inv.dot(&v_obs.t())
}

// ─────────────────────────────────────────────────────────────
//  Norm helpers
// ─────────────────────────────────────────────────────────────

/// Frobenius norm of a dense matrix.
pub fn frobenius_norm(a: &Array2<f64>) -> f64 {
    a.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Frobenius distance ‖QᵗQ − I‖_F, the orthonormality defect of a
/// basis with k columns.
pub fn orthonormality_defect(q: &Array2<f64>) -> f64 {
    let qtq = q.t().dot(q);
    let k = qtq.nrows();
    let mut acc = 0.0;
    for i in 0..k {
        for j in 0..k {
            let reference = if i == j { 1.0 } else { 0.0 };
            let d = qtq[[i, j]] - reference;
            acc += d * d;
        }
    }
    acc.sqrt()
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────
