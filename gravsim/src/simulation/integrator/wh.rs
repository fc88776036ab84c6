//! Wisdom–Holman mapping in Jacobi coordinates
//!
//! Particle 0 is the central body. Jacobi particle `i >= 1` is the position
//! of real particle `i` relative to the centre of mass of particles `0..i`,
//! and moves on a Kepler orbit around the mass `eta[i] = m_0 + … + m_i`.
//! Jacobi particle 0 is the centre of mass of the whole system and drifts
//! in a straight line. Everything not captured by those Kepler orbits is
//! applied as an interaction kick.
//!
//! `Wh` is the plain scheme: it transforms in and out of Jacobi coordinates
//! on every step and always finishes synchronized.

use crate::error::{SimError, SimResult};
use crate::simulation::hooks::Hooks;
use crate::simulation::integrator::kepler::kepler_drift;
use crate::simulation::integrator::{drift, kick};
use crate::simulation::states::Particle;
use crate::simulation::world::SimState;

/// Jacobi coordinates of the real particles plus the cumulative masses
#[derive(Debug, Clone, Default)]
pub struct Jacobi {
    pub(crate) p_j: Vec<Particle>,
    pub(crate) eta: Vec<f64>,
}

impl Jacobi {
    /// Recompute Jacobi positions, velocities and masses from `particles`.
    pub fn from_inertial(&mut self, particles: &[Particle]) {
        let n = particles.len();
        self.p_j.clear();
        self.p_j.resize(n, Particle::default());
        self.eta.clear();
        self.eta.resize(n, 0.0);
        if n == 0 {
            return;
        }

        let mut sx = particles[0].m * particles[0].x; // mass-weighted sums
        let mut sv = particles[0].m * particles[0].v;
        let mut e = particles[0].m;
        self.eta[0] = e;

        for i in 1..n {
            let p = &particles[i];
            self.p_j[i].x = p.x - sx / e;
            self.p_j[i].v = p.v - sv / e;
            self.p_j[i].m = p.m;
            sx += p.m * p.x;
            sv += p.m * p.v;
            e += p.m;
            self.eta[i] = e;
        }

        self.p_j[0].x = sx / e;
        self.p_j[0].v = sv / e;
        self.p_j[0].m = e;
    }

    /// Write inertial positions back into `particles`.
    pub fn to_inertial_pos(&self, particles: &mut [Particle]) {
        let n = particles.len().min(self.p_j.len());
        if n == 0 {
            return;
        }
        let mut com = self.p_j[0].x;
        for i in (1..n).rev() {
            let ri = self.p_j[i].x;
            let prev = com - (particles[i].m / self.eta[i]) * ri;
            particles[i].x = ri + prev;
            com = prev;
        }
        particles[0].x = com;
    }

    /// Write inertial positions and velocities back into `particles`.
    pub fn to_inertial_posvel(&self, particles: &mut [Particle]) {
        let n = particles.len().min(self.p_j.len());
        if n == 0 {
            return;
        }
        let mut com_x = self.p_j[0].x;
        let mut com_v = self.p_j[0].v;
        for i in (1..n).rev() {
            let w = particles[i].m / self.eta[i];
            let prev_x = com_x - w * self.p_j[i].x;
            let prev_v = com_v - w * self.p_j[i].v;
            particles[i].x = self.p_j[i].x + prev_x;
            particles[i].v = self.p_j[i].v + prev_v;
            com_x = prev_x;
            com_v = prev_v;
        }
        particles[0].x = com_x;
        particles[0].v = com_v;
    }

    /// Jacobi accelerations from the inertial ones in `particles[..].a`.
    pub fn accelerations_from_inertial(&mut self, particles: &[Particle]) {
        let n = particles.len().min(self.p_j.len());
        if n == 0 {
            return;
        }
        let mut sa = particles[0].m * particles[0].a;
        for i in 1..n {
            let p = &particles[i];
            self.p_j[i].a = p.a - sa / self.eta[i - 1];
            sa += p.m * p.a;
        }
        self.p_j[0].a = sa / self.eta[n - 1];
    }

    /// Kepler drift of every Jacobi particle, straight line for the COM.
    pub fn kepler_step(&mut self, G: f64, dt: f64) {
        let n = self.p_j.len();
        if n == 0 {
            return;
        }
        let com_v = self.p_j[0].v;
        self.p_j[0].x += dt * com_v;
        for i in 1..n {
            let mu = G * self.eta[i];
            let p = &mut self.p_j[i];
            kepler_drift(&mut p.x, &mut p.v, mu, dt);
        }
    }

    /// Interaction kick from the Jacobi accelerations. Particle `i > 1` also
    /// gets the Kepler term of its own orbit back, which the inertial sum
    /// (computed without the 0-1 pair) already contains in a different form.
    pub fn interaction_step(&mut self, G: f64, dt: f64) {
        for i in 1..self.p_j.len() {
            let mut dv = dt * self.p_j[i].a;
            if i > 1 {
                let r = self.p_j[i].x;
                let r2 = r.norm_squared();
                if r2 > 0.0 {
                    let r3 = r2 * r2.sqrt();
                    dv += dt * G * self.eta[i] / r3 * r;
                }
            }
            self.p_j[i].v += dv;
        }
    }

    pub fn clear(&mut self) {
        self.p_j.clear();
        self.eta.clear();
    }
}

/// Jacobi coordinates need a massive central body.
pub(crate) fn check_central_mass(state: &SimState, integrator: &str) -> SimResult<()> {
    match state.particles.real().first() {
        Some(p) if p.m > 0.0 => Ok(()),
        Some(_) => Err(SimError::config(format!(
            "{integrator} needs a positive central mass in particle 0"
        ))),
        None => Ok(()),
    }
}

/// Inertial accelerations for the interaction step: everything except the
/// 0-1 pair, which the Kepler drift of Jacobi particle 1 handles exactly.
pub(crate) fn interaction_accelerations(state: &mut SimState, hooks: &mut Hooks) {
    let ignore = state.gravity_ignore_10;
    state.gravity_ignore_10 = true;
    state.update_acceleration(hooks);
    state.gravity_ignore_10 = ignore;
}

/// Linear drift of the shadow block
pub(crate) fn drift_shadows(state: &mut SimState, dt: f64) {
    let n_real = state.particles.n_real();
    drift(&mut state.particles.as_mut_slice()[n_real..], dt);
}

pub(crate) fn kick_shadows(state: &mut SimState, dt: f64) {
    let n_real = state.particles.n_real();
    kick(&mut state.particles.as_mut_slice()[n_real..], dt);
}

#[derive(Debug, Clone, Default)]
pub struct Wh {
    jacobi: Jacobi,
}

impl Wh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        let dt = state.dt;
        let half_dt = 0.5 * dt;
        check_central_mass(state, "WH")?;

        self.jacobi.from_inertial(state.particles.real());
        self.jacobi.kepler_step(state.G, half_dt);
        drift_shadows(state, half_dt);
        state.t += half_dt;

        if state.force_is_velocity_dependent {
            self.jacobi.to_inertial_posvel(state.particles.real_mut());
        } else {
            self.jacobi.to_inertial_pos(state.particles.real_mut());
        }
        interaction_accelerations(state, hooks);

        self.jacobi.accelerations_from_inertial(state.particles.real());
        self.jacobi.interaction_step(state.G, dt);
        kick_shadows(state, dt);

        self.jacobi.kepler_step(state.G, half_dt);
        drift_shadows(state, half_dt);
        state.t += half_dt;

        self.jacobi.to_inertial_posvel(state.particles.real_mut());
        state.dt_last_done = dt;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.jacobi.clear();
    }
}
