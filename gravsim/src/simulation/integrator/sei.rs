//! Symplectic epicycle integrator for the shearing sheet
//!
//! The Hill equations split into the free epicyclic motion (solved exactly)
//! and the self-gravity kick. The epicyclic part is a rotation of the
//! epicycle vector around its guiding centre, and the vertical part a
//! rotation in `(Ω_z z, v_z)`. Both rotations are done as three shears,
//! which keeps them exactly area preserving in floating point.
//!
//! The free motion is linear in the coordinates, so shadows take the same
//! operator as the real particles.

use crate::error::{SimError, SimResult};
use crate::simulation::hooks::Hooks;
use crate::simulation::integrator::kick;
use crate::simulation::states::Particle;
use crate::simulation::world::SimState;

/// Shear coefficients for half of a step `dt`, cached per `(dt, Ω, Ω_z)`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct HalfStep {
    dt: f64, // full step
    omega: f64,
    omega_z: f64,
    sindt: f64,
    tandt: f64,
    sindtz: f64,
    tandtz: f64,
}

impl HalfStep {
    fn new(dt: f64, omega: f64, omega_z: f64) -> Self {
        Self {
            dt,
            omega,
            omega_z,
            sindt: (omega * (-dt / 2.0)).sin(),
            tandt: (omega * (-dt / 4.0)).tan(),
            sindtz: (omega_z * (-dt / 2.0)).sin(),
            tandtz: (omega_z * (-dt / 4.0)).tan(),
        }
    }

    /// Exact epicyclic motion over half a step
    fn apply(&self, p: &mut Particle) {
        let (om, omz) = (self.omega, self.omega_z);

        // vertical
        let zx = p.x.z * omz;
        let zy = p.v.z;
        let zt1 = zx - self.tandtz * zy;
        let zyt = self.sindtz * zt1 + zy;
        let zxt = zt1 - self.tandtz * zyt;
        p.x.z = zxt / omz;
        p.v.z = zyt;

        // in-plane: guiding centre (a0, b0) and epicycle vector (xs, ys)
        let a0 = 2.0 * p.v.y + 4.0 * p.x.x * om;
        let b0 = p.x.y * om - 2.0 * p.v.x;
        let ys = (p.x.y * om - b0) / 2.0;
        let xs = p.x.x * om - a0;

        let xst1 = xs - self.tandt * ys;
        let yst = self.sindt * xst1 + ys;
        let xst = xst1 - self.tandt * yst;

        p.x.x = (xst + a0) / om;
        p.x.y = (yst * 2.0 + b0) / om - 0.75 * a0 * self.dt;
        p.v.x = yst;
        p.v.y = -xst * 2.0 - 1.5 * a0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sei {
    half: Option<HalfStep>,
}

impl Sei {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        let omega = state.omega;
        let omega_z = state.omega_z.unwrap_or(omega);
        if !(omega > 0.0) || !(omega_z > 0.0) {
            return Err(SimError::config(format!(
                "SEI needs positive epicyclic frequencies, got omega = {omega}, omega_z = {omega_z}"
            )));
        }

        let dt = state.dt;
        let half_dt = 0.5 * dt;
        let half = match self.half {
            Some(h) if h.dt == dt && h.omega == omega && h.omega_z == omega_z => h,
            _ => {
                let h = HalfStep::new(dt, omega, omega_z);
                self.half = Some(h);
                h
            }
        };

        for p in state.particles.as_mut_slice() {
            half.apply(p);
        }
        state.t += half_dt;

        state.update_acceleration(hooks);
        kick(state.particles.as_mut_slice(), dt);

        for p in state.particles.as_mut_slice() {
            half.apply(p);
        }
        state.t += half_dt;

        state.dt_last_done = dt;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.half = None;
    }
}
