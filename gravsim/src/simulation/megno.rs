//! MEGNO and Lyapunov tracking
//!
//! `megno_init` gives every real particle a shadow holding a small random
//! displacement in phase space. The integrators advance the shadows with the
//! linearized equations of motion; after each step the growth rate of the
//! displacement feeds the running MEGNO sum and the streaming covariance of
//! `<Y>` against time, whose slope estimates the Lyapunov exponent.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::simulation::states::{NVec3, Particle};
use crate::simulation::world::SimState;

/// Running MEGNO statistics, single pass, no history
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MegnoStats {
    pub ys: f64,     // running integral of Y
    pub yss: f64,    // running integral of <Y>
    pub cov_yt: f64, // covariance of (<Y>, t)
    pub var_t: f64,  // variance of t
    pub mean_t: f64,
    pub mean_y: f64,
    pub n: u64,
}

impl MegnoStats {
    /// `<Y>` at time `t`
    pub fn megno(&self, t: f64) -> f64 {
        if t == 0.0 {
            0.0
        } else {
            self.yss / t
        }
    }

    pub fn lyapunov(&self, t: f64) -> f64 {
        if t == 0.0 || self.var_t == 0.0 {
            0.0
        } else {
            self.cov_yt / self.var_t
        }
    }

    /// Fold in one step of length `dt_done` ending at `t` with increment `dy`.
    pub fn update(&mut self, t: f64, dt_done: f64, dy: f64) {
        if t == 0.0 {
            return;
        }
        self.ys += dy;
        let y = self.ys / t;
        self.yss += y * dt_done;

        self.n += 1;
        let n = self.n as f64;
        self.mean_t += (t - self.mean_t) / n;
        let megno = self.megno(t);
        self.mean_y += (megno - self.mean_y) / n;
        self.cov_yt += (n - 1.0) / n * (t - self.mean_t) * (megno - self.mean_y);
        self.var_t += (n - 1.0) / n * (t - self.mean_t) * (t - self.mean_t);
    }
}

impl SimState {
    /// Start tracking: one shadow per real particle, displaced by a random
    /// 6D vector of length `delta`. Existing shadows are replaced and the
    /// statistics zeroed.
    pub fn megno_init(&mut self, delta: f64, seed: u64) {
        self.particles.clear_variational();
        self.megno = MegnoStats::default();

        let mut rng = StdRng::seed_from_u64(seed);
        let n_real = self.particles.n_real();
        for i in 0..n_real {
            let (m, id) = match self.particles.get(i) {
                Some(p) => (p.m, p.id),
                None => continue,
            };
            let mut sample = || -> f64 { StandardNormal.sample(&mut rng) };
            let dx = NVec3::new(sample(), sample(), sample());
            let dv = NVec3::new(sample(), sample(), sample());
            let norm = (dx.norm_squared() + dv.norm_squared()).sqrt();
            let scale = if norm > 0.0 { delta / norm } else { 0.0 };

            self.particles.push_variational(Particle {
                x: dx * scale,
                v: dv * scale,
                m,
                id,
                ..Particle::default()
            });
        }
        self.drop_tree();
        self.layout_epoch += 1;
    }

    pub fn megno_active(&self) -> bool {
        self.particles.n_var() > 0
    }

    /// `(δ · δ̇) / (δ · δ)` over all shadows, in phase space
    pub fn megno_deltad_delta(&self) -> f64 {
        let mut deltad = 0.0;
        let mut delta2 = 0.0;
        for p in self.particles.variational() {
            deltad += p.v.dot(&p.x) + p.a.dot(&p.v);
            delta2 += p.x.norm_squared() + p.v.norm_squared();
        }
        if delta2 == 0.0 {
            0.0
        } else {
            deltad / delta2
        }
    }

    /// Per-step MEGNO update, after the integrator advanced the shadows.
    pub fn megno_update(&mut self) {
        if !self.megno_active() {
            return;
        }
        self.update_variational_acceleration();
        let dy = self.dt_last_done * 2.0 * self.t * self.megno_deltad_delta();
        self.megno.update(self.t, self.dt_last_done, dy);
    }

    pub fn calculate_megno(&self) -> f64 {
        self.megno.megno(self.t)
    }

    pub fn calculate_lyapunov(&self) -> f64 {
        self.megno.lyapunov(self.t)
    }
}
