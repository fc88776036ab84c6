//! Drift–kick–drift leapfrog
//!
//! Second order, symplectic, one force evaluation per step. Shadows are
//! advanced by the same drifts and kick.

use crate::error::SimResult;
use crate::simulation::hooks::Hooks;
use crate::simulation::integrator::{drift, kick};
use crate::simulation::world::SimState;

#[derive(Debug, Clone, Copy, Default)]
pub struct Leapfrog;

impl Leapfrog {
    /// Advance by one step of `state.dt`; every particle, including the
    /// shadows, is drifted and kicked.
    pub fn advance(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        let dt = state.dt; // time step dt
        let half_dt = 0.5 * dt; // half step dt/2

        // Drift: x_n+1/2 = x_n + (dt/2) * v_n
        drift(state.particles.as_mut_slice(), half_dt);
        state.t += half_dt;

        // a_n+1/2 from x_n+1/2
        state.update_acceleration(hooks);

        // Kick: v_n+1 = v_n + dt * a_n+1/2
        kick(state.particles.as_mut_slice(), dt);

        // Second drift: x_n+1 = x_n+1/2 + (dt/2) * v_n+1
        drift(state.particles.as_mut_slice(), half_dt);
        state.t += half_dt;

        state.dt_last_done = dt;
        Ok(())
    }
}
