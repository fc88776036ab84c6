//! Two-body drift in universal variables
//!
//! Advances a relative position/velocity pair along its Kepler orbit around
//! a fixed mass `mu = G * M`, for bound and unbound orbits alike. The
//! universal anomaly `chi` solves
//!
//! `r0 chi + η0 G2(chi) + ζ0 G3(chi) = dt`
//!
//! with `β = 2μ/r0 - v0²`, `η0 = r0 · v0`, `ζ0 = μ - β r0` and the Stumpff
//! based functions `Gk(chi) = chi^k c_k(β chi²)`. Halley's method is tried first;
//! if it fails to settle, the root is bracketed and bisected (the left side
//! is monotonic in `chi` because its derivative is the radius).

use crate::simulation::states::NVec3;

const HALLEY_MAX_ITER: usize = 32;
const BISECTION_MAX_ITER: usize = 256;
const STUMPFF_SERIES_LIMIT: f64 = 0.1;

/// Drift `(x, v)` by `dt` around `mu`. Falls back to a straight line when
/// there is no central mass or the body sits on it.
pub fn kepler_drift(x: &mut NVec3, v: &mut NVec3, mu: f64, dt: f64) {
    let r0 = x.norm();
    if mu == 0.0 || r0 == 0.0 || dt == 0.0 {
        *x += dt * *v;
        return;
    }

    let v2 = v.norm_squared();
    let beta = 2.0 * mu / r0 - v2;
    let eta0 = x.dot(v);
    let zeta0 = mu - beta * r0;

    let chi = solve_universal_anomaly(r0, eta0, zeta0, beta, dt);
    let [g0, g1, g2, g3] = g_functions(beta, chi);

    let r = r0 * g0 + eta0 * g1 + mu * g2;
    let f = 1.0 - mu * g2 / r0;
    let g = dt - mu * g3;
    let fd = -mu * g1 / (r0 * r);
    let gd = 1.0 - mu * g2 / r;

    let x0 = *x;
    let v0 = *v;
    *x = f * x0 + g * v0;
    *v = fd * x0 + gd * v0;
}

fn solve_universal_anomaly(r0: f64, eta0: f64, zeta0: f64, beta: f64, dt: f64) -> f64 {
    let residual = |chi: f64| {
        let [g0, g1, g2, g3] = g_functions(beta, chi);
        let f = r0 * chi + eta0 * g2 + zeta0 * g3 - dt;
        let fp = r0 * g0 + eta0 * g1 + (zeta0 + beta * r0) * g2;
        let fpp = eta0 * g0 + zeta0 * g1;
        (f, fp, fpp)
    };

    let mut chi = dt / r0;
    for _ in 0..HALLEY_MAX_ITER {
        let (f, fp, fpp) = residual(chi);
        if f == 0.0 {
            return chi;
        }
        let denom = fp * fp - 0.5 * f * fpp;
        if denom == 0.0 || !denom.is_finite() {
            break;
        }
        let step = f * fp / denom;
        let next = chi - step;
        if !next.is_finite() {
            break;
        }
        if (next - chi).abs() <= 1e-14 * next.abs() {
            return next;
        }
        chi = next;
    }

    bisect(|chi| residual(chi).0, dt)
}

// f(chi) is increasing with f(0) = -dt; expand a bracket away from 0 until it
// changes sign, then halve it.
fn bisect<F: Fn(f64) -> f64>(f: F, dt: f64) -> f64 {
    let dir = dt.signum();
    let mut lo = 0.0;
    let mut hi = dir * dt.abs().max(1e-12);
    let mut expansions = 0;
    while dir * f(hi) < 0.0 && expansions < 1100 {
        lo = hi;
        hi *= 2.0;
        expansions += 1;
    }

    for _ in 0..BISECTION_MAX_ITER {
        let mid = 0.5 * (lo + hi);
        if mid == lo || mid == hi {
            break;
        }
        let fm = f(mid);
        if dir * fm < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// `[G0, G1, G2, G3]` at anomaly `chi` for energy parameter `beta`
fn g_functions(beta: f64, chi: f64) -> [f64; 4] {
    let chi2 = chi * chi;
    let [c0, c1, c2, c3] = stumpff(beta * chi2);
    [c0, chi * c1, chi2 * c2, chi2 * chi * c3]
}

/// Stumpff functions `c0..c3` at `z`
pub fn stumpff(z: f64) -> [f64; 4] {
    if z.abs() < STUMPFF_SERIES_LIMIT {
        // c_k(z) = Σ (-z)^n / (2n + k)!
        let mut c2 = 0.0;
        let mut c3 = 0.0;
        let mut term2 = 0.5; // 1/2!
        let mut term3 = 1.0 / 6.0; // 1/3!
        for n in 0..10 {
            c2 += term2;
            c3 += term3;
            let k = 2.0 * n as f64;
            term2 *= -z / ((k + 3.0) * (k + 4.0));
            term3 *= -z / ((k + 4.0) * (k + 5.0));
        }
        return [1.0 - z * c2, 1.0 - z * c3, c2, c3];
    }

    let (c0, c1) = if z > 0.0 {
        let s = z.sqrt();
        (s.cos(), s.sin() / s)
    } else {
        let s = (-z).sqrt();
        (s.cosh(), s.sinh() / s)
    };
    [c0, c1, (1.0 - c0) / z, (1.0 - c1) / z]
}
