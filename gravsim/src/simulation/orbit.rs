//! Osculating orbital elements and centre-of-mass helpers
//!
//! Elements of a particle relative to a primary, for `mu = G (m + m_primary)`.
//! Angles are in radians, `Ω`, `ω` and `f` in `[0, 2π)`.
//!
//! Degenerate orbits follow one rule: an angle that is undefined is set to
//! zero and the next angle along the chain picks up the difference, so the
//! true longitude `Ω + ω + f` is always exact.
//! - equatorial orbits (`inc` 0 or π): `Ω = 0`, `ω` measured from the x axis
//! - circular orbits: `ω = 0`, `f` is the argument of latitude (or the true
//!   longitude if also equatorial)

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::simulation::states::{NVec3, Particle};

/// Below this (relative) size an eccentricity or node vector counts as zero
const TINY: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    pub a: f64,          // semi-major axis (negative for unbound orbits)
    pub r: f64,          // distance to the primary
    pub h: f64,          // specific angular momentum
    pub period: f64,     // infinite for unbound orbits
    pub l: f64,          // mean longitude
    pub e: f64,          // eccentricity
    pub inc: f64,        // inclination
    pub omega_node: f64, // longitude of the ascending node, Ω
    pub omega: f64,      // argument of pericentre, ω
    pub f: f64,          // true anomaly
}

impl Orbit {
    /// Elements of `p` around `primary`.
    ///
    /// Fails for a massless primary, for coincident particles and for
    /// radial orbits (zero angular momentum).
    pub fn from_particles(G: f64, p: &Particle, primary: &Particle) -> SimResult<Self> {
        if primary.m <= 0.0 {
            return Err(SimError::Orbit("primary has no mass".into()));
        }
        let mu = G * (p.m + primary.m);
        let d = p.x - primary.x;
        let dv = p.v - primary.v;

        let r = d.norm();
        if r == 0.0 {
            return Err(SimError::Orbit("particle sits on its primary".into()));
        }
        let hvec = d.cross(&dv);
        let h = hvec.norm();
        if h == 0.0 {
            return Err(SimError::Orbit("radial orbit has no orbital plane".into()));
        }

        let v2 = dv.norm_squared();
        let vcirc2 = mu / r;
        let a = -mu / (v2 - 2.0 * vcirc2);
        let vr = d.dot(&dv) / r;
        let evec = ((v2 - vcirc2) * d - r * vr * dv) / mu;
        let e = evec.norm();

        let inc = (hvec.z / h).clamp(-1.0, 1.0).acos();
        let prograde = hvec.z >= 0.0;
        let nvec = NVec3::new(-hvec.y, hvec.x, 0.0); // node vector z × h
        let n = nvec.norm();
        let equatorial = n <= TINY * h;
        let circular = e <= TINY;

        let omega_node = if equatorial {
            0.0
        } else {
            wrap(nvec.y.atan2(nvec.x))
        };

        // angle in the orbital plane from the reference direction (node line,
        // or x axis for equatorial orbits), counted along the motion
        let normal = hvec.cross(&nvec); // in-plane, 90° ahead of the node
        let in_plane = |u: &NVec3| -> f64 {
            if equatorial {
                let theta = u.y.atan2(u.x);
                wrap(if prograde { theta } else { -theta })
            } else {
                let cos = nvec.dot(u) / n;
                let sin = normal.dot(u) / (h * n);
                wrap(sin.atan2(cos))
            }
        };

        let omega = if circular { 0.0 } else { in_plane(&evec) };
        let f = if circular {
            in_plane(&d)
        } else {
            let cosf = (evec.dot(&d) / (e * r)).clamp(-1.0, 1.0);
            let f = cosf.acos();
            if vr < 0.0 {
                TAU - f
            } else {
                f
            }
        };

        let period = if a > 0.0 {
            TAU * (a * a * a / mu).sqrt()
        } else {
            f64::INFINITY
        };
        let l = wrap(omega_node + omega + mean_anomaly(e, f));

        Ok(Self {
            a,
            r,
            h,
            period,
            l,
            e,
            inc,
            omega_node,
            omega,
            f,
        })
    }
}

/// Mean anomaly from the true anomaly
fn mean_anomaly(e: f64, f: f64) -> f64 {
    if e < 1.0 {
        let ea = 2.0 * (((1.0 - e) / (1.0 + e)).sqrt() * (f / 2.0).tan()).atan();
        ea - e * ea.sin()
    } else if e > 1.0 {
        let fa = 2.0 * (((e - 1.0) / (e + 1.0)).sqrt() * (f / 2.0).tan()).atanh();
        e * fa.sinh() - fa
    } else {
        // parabolic: Barker's equation
        let d = (f / 2.0).tan();
        d + d * d * d / 3.0
    }
}

fn wrap(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a >= TAU || a.is_nan() {
        0.0
    } else {
        a
    }
}

/// Centre of mass of two particles (mass, position, velocity). Massless
/// pairs keep `a`.
pub fn com_of_pair(a: &Particle, b: &Particle) -> Particle {
    let m = a.m + b.m;
    if m == 0.0 {
        return Particle { m: 0.0, ..*a };
    }
    Particle {
        x: (a.m * a.x + b.m * b.x) / m,
        v: (a.m * a.v + b.m * b.v) / m,
        m,
        ..Particle::default()
    }
}
