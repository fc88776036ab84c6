//! Gravity for the integration core
//!
//! Every gravity source implements [`Acceleration`] and adds its
//! contribution into one output slot per real particle. Sums run in
//! parallel over target particles, but each target adds its sources in a
//! fixed order, so the result does not depend on the number of threads.
//!
//! Only the first `n_active` particles source gravity. Shadow particles
//! never appear in these sums; [`VariationalGravity`] gives them the
//! linearized acceleration instead.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::simulation::barnes_hut::BarnesHutTree;
use crate::simulation::boundary::GhostBox;
use crate::simulation::states::{NVec3, Particle};

/// How self-gravity is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GravityMode {
    #[serde(rename = "none")]
    None,
    #[default]
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "compensated")]
    Compensated,
    #[serde(rename = "tree")]
    Tree,
}

/// A source of acceleration on the real particles
pub trait Acceleration {
    /// Add this term's acceleration on `particles[i]` into `out[i]`.
    fn accumulate(&self, particles: &[Particle], out: &mut [NVec3]);
}

/// Direct pairwise Newtonian gravity with softening, summed over every
/// ghost image of the sources.
pub struct NewtonianGravity<'a> {
    pub G: f64,
    pub eps2: f64,
    pub n_active: usize,
    pub ignore_10: bool, // skip the 0-1 pair (WH-family integrators)
    pub ghosts: &'a [GhostBox],
}

impl Acceleration for NewtonianGravity<'_> {
    fn accumulate(&self, particles: &[Particle], out: &mut [NVec3]) {
        let n_active = self.n_active.min(particles.len());

        out.par_iter_mut().enumerate().for_each(|(i, a)| {
            let mut acc = NVec3::zeros();
            for gb in self.ghosts {
                let q = particles[i].x + gb.position;
                for j in 0..n_active {
                    if i == j || (self.ignore_10 && is_pair_10(i, j)) {
                        continue;
                    }
                    acc += pair_term(self.G, self.eps2, &particles[j], q);
                }
            }
            *a += acc;
        });
    }
}

/// Direct gravity with Kahan-compensated accumulation per particle
pub struct CompensatedGravity<'a> {
    pub G: f64,
    pub eps2: f64,
    pub n_active: usize,
    pub ignore_10: bool,
    pub ghosts: &'a [GhostBox],
}

impl Acceleration for CompensatedGravity<'_> {
    fn accumulate(&self, particles: &[Particle], out: &mut [NVec3]) {
        let n_active = self.n_active.min(particles.len());

        out.par_iter_mut().enumerate().for_each(|(i, a)| {
            let mut sum = *a;
            let mut err = NVec3::zeros();
            for gb in self.ghosts {
                let q = particles[i].x + gb.position;
                for j in 0..n_active {
                    if i == j || (self.ignore_10 && is_pair_10(i, j)) {
                        continue;
                    }
                    compensated_add_vec(&mut sum, pair_term(self.G, self.eps2, &particles[j], q), &mut err);
                }
            }
            *a = sum;
        });
    }
}

/// Gravity through a Barnes–Hut tree, one tree walk per ghost image
pub struct TreeGravity<'a> {
    pub G: f64,
    pub eps2: f64,
    pub opening_angle2: f64,
    pub ignore_10: bool,
    pub ghosts: &'a [GhostBox],
    pub tree: &'a BarnesHutTree,
}

impl Acceleration for TreeGravity<'_> {
    fn accumulate(&self, particles: &[Particle], out: &mut [NVec3]) {
        out.par_iter_mut().enumerate().for_each(|(i, a)| {
            let exclude = match i {
                0 | 1 if self.ignore_10 => Some(1 - i),
                _ => None,
            };
            for gb in self.ghosts {
                let q = particles[i].x + gb.position;
                *a += self.tree.acceleration_at(
                    i,
                    exclude,
                    q,
                    particles,
                    self.G,
                    self.eps2,
                    self.opening_angle2,
                );
            }
        });
    }
}

/// Linearized gravity acting on the shadow particles.
///
/// Shadow `k` (stored at `n_real + k`) is the displacement `δ_k` of real
/// particle `k`:
///
/// `δa_k = Σ_j G m_j [ δ_jk / ρ³ - 3 r (r · δ_jk) / ρ⁵ ]`
///
/// with `r = x_j - x_k`, `δ_jk = δ_j - δ_k` and `ρ² = r² + eps2`. Ghost boxes
/// and the 0-1 exclusion do not apply here.
pub struct VariationalGravity {
    pub G: f64,
    pub eps2: f64,
    pub n_active: usize,
}

impl VariationalGravity {
    /// `all` is the whole particle buffer, `out[k]` receives shadow `k`.
    pub fn accumulate(&self, all: &[Particle], n_real: usize, out: &mut [NVec3]) {
        let (real, shadows) = all.split_at(n_real);
        let n_active = self.n_active.min(n_real);

        out.par_iter_mut().enumerate().for_each(|(k, a)| {
            if k >= real.len() {
                return;
            }
            let xk = real[k].x;
            let dk = shadows[k].x;
            let mut acc = NVec3::zeros();
            for j in 0..n_active.min(shadows.len()) {
                if j == k {
                    continue;
                }
                let r = real[j].x - xk;
                let dr = shadows[j].x - dk;
                let rho2 = r.norm_squared() + self.eps2;
                let rho = rho2.sqrt();
                let rho3 = rho2 * rho;
                let rho5 = rho3 * rho2;
                acc += self.G * real[j].m * (dr / rho3 - 3.0 * r * r.dot(&dr) / rho5);
            }
            *a += acc;
        });
    }
}

/// Potential energy of the real particles, `-G m_i m_j / ρ` summed over
/// pairs with at least one active member.
pub fn potential_energy(particles: &[Particle], n_active: usize, G: f64, eps2: f64) -> f64 {
    let n = particles.len();
    let mut e = 0.0;
    for i in 0..n_active.min(n) {
        for j in (i + 1)..n {
            let d = particles[j].x - particles[i].x;
            let rho = (d.norm_squared() + eps2).sqrt();
            e -= G * particles[i].m * particles[j].m / rho;
        }
    }
    e
}

/// Kahan summation step: add `value` into `sum`, carrying the rounding
/// error in `err`.
pub fn compensated_add(sum: &mut f64, value: f64, err: &mut f64) {
    let y = value - *err;
    let t = *sum + y;
    *err = (t - *sum) - y;
    *sum = t;
}

pub fn compensated_add_vec(sum: &mut NVec3, value: NVec3, err: &mut NVec3) {
    for c in 0..3 {
        compensated_add(&mut sum[c], value[c], &mut err[c]);
    }
}

// acceleration at q from source p
#[inline]
fn pair_term(G: f64, eps2: f64, p: &Particle, q: NVec3) -> NVec3 {
    let d = p.x - q;
    let r2 = d.norm_squared() + eps2;
    let inv_r = r2.sqrt().recip();
    G * p.m * inv_r * inv_r * inv_r * d
}

#[inline]
fn is_pair_10(i: usize, j: usize) -> bool {
    (i == 0 && j == 1) || (i == 1 && j == 0)
}
