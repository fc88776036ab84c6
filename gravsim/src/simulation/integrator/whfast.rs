//! WHFast: Wisdom–Holman with a persistent Jacobi cache
//!
//! Between synchronized steps the Jacobi coordinates are kept and the
//! closing half drift of one step is merged with the opening half drift of
//! the next. Synchronizing finishes the pending half drift, undoes the
//! symplectic corrector and writes inertial coordinates back.
//!
//! With `safe_mode` (the default) every step ends synchronized, so changes
//! made by the host between steps are always seen. Without it, the host has
//! to call `particles_modified` after touching the particles.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::simulation::hooks::Hooks;
use crate::simulation::integrator::wh::{
    check_central_mass, drift_shadows, interaction_accelerations, kick_shadows, Jacobi,
};
use crate::simulation::world::SimState;

// Symplectic corrector coefficients (Wisdom, Holman & Touma 1996)
const A1: f64 = 0.41833001326703777398908601289259374469640768464934;
const A2: f64 = 2.0 * A1;
const A3: f64 = 3.0 * A1;
const B31: f64 = -0.024900596027799867499350357910273437184309981229127;
const B51: f64 = -0.0083001986759332891664501193034244790614366604097090;
const B52: f64 = 0.041500993379666445832250596517122395307183302048545;
const B71: f64 = 0.0024926811426922105779030593952219392098755787599155;
const B72: f64 = -0.018270923012828701637352869040232437934044917096717;
const B73: f64 = 0.053547888829214537540632689232496225096502985609155;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhFastSettings {
    pub corrector: u8, // 0 (off), 3, 5 or 7
    pub safe_mode: bool,
}

impl Default for WhFastSettings {
    fn default() -> Self {
        Self {
            corrector: 0,
            safe_mode: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhFast {
    pub settings: WhFastSettings,
    jacobi: Jacobi,
    is_synchronized: bool,
    recalculate_jacobi: bool,
    last_dt: f64,       // dt of the step whose half drift is pending
    epoch: Option<u64>, // layout the cache was built for
}

impl Default for WhFast {
    fn default() -> Self {
        Self::new(WhFastSettings::default())
    }
}

impl WhFast {
    pub fn new(settings: WhFastSettings) -> Self {
        Self {
            settings,
            jacobi: Jacobi::default(),
            is_synchronized: true,
            recalculate_jacobi: true,
            last_dt: 0.0,
            epoch: None,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.is_synchronized
    }

    pub fn advance(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        let corrector = self.settings.corrector;
        if !matches!(corrector, 0 | 3 | 5 | 7) {
            return Err(SimError::config(format!(
                "WHFast corrector order must be 0, 3, 5 or 7, got {corrector}"
            )));
        }
        check_central_mass(state, "WHFast")?;

        if self.epoch != Some(state.layout_epoch) {
            // the cache no longer matches the particles; inertial coordinates win
            self.is_synchronized = true;
            self.recalculate_jacobi = true;
            self.epoch = Some(state.layout_epoch);
        }
        if !self.is_synchronized && state.dt != self.last_dt {
            debug!("WHFast: dt changed from {} to {}, synchronizing first", self.last_dt, state.dt);
            self.synchronize(state, hooks)?;
        }

        self.part1(state, hooks)?;
        self.part2(state, hooks)
    }

    fn part1(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        let dt = state.dt;
        if self.recalculate_jacobi {
            self.jacobi.from_inertial(state.particles.real());
            self.recalculate_jacobi = false;
        }

        if self.is_synchronized {
            if self.settings.corrector > 0 {
                self.apply_corrector(state, hooks, 1.0, dt);
            }
            self.jacobi.kepler_step(state.G, 0.5 * dt);
            drift_shadows(state, 0.5 * dt);
        } else {
            self.jacobi.kepler_step(state.G, dt);
            drift_shadows(state, dt);
        }
        state.t += 0.5 * dt;

        if state.force_is_velocity_dependent {
            self.jacobi.to_inertial_posvel(state.particles.real_mut());
        } else {
            self.jacobi.to_inertial_pos(state.particles.real_mut());
        }
        interaction_accelerations(state, hooks);
        Ok(())
    }

    fn part2(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        let dt = state.dt;
        self.jacobi.accelerations_from_inertial(state.particles.real());
        self.jacobi.interaction_step(state.G, dt);
        kick_shadows(state, dt);

        state.t += 0.5 * dt;
        state.dt_last_done = dt;
        self.is_synchronized = false;
        self.last_dt = dt;

        if self.settings.safe_mode {
            self.synchronize(state, hooks)?;
        }
        Ok(())
    }

    /// Finish the pending half drift and write inertial coordinates back.
    /// No-op when already synchronized.
    pub fn synchronize(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        if self.is_synchronized {
            return Ok(());
        }
        let dt = self.last_dt;
        self.jacobi.kepler_step(state.G, 0.5 * dt);
        drift_shadows(state, 0.5 * dt);
        if self.settings.corrector > 0 {
            self.apply_corrector(state, hooks, -1.0, dt);
        }
        self.jacobi.to_inertial_posvel(state.particles.real_mut());
        self.is_synchronized = true;
        Ok(())
    }

    /// The host changed the particles: rebuild the Jacobi cache from the
    /// inertial coordinates before the next step.
    pub fn particles_modified(&mut self) {
        self.recalculate_jacobi = true;
    }

    pub fn reset(&mut self) {
        self.jacobi.clear();
        self.is_synchronized = true;
        self.recalculate_jacobi = true;
        self.last_dt = 0.0;
        self.epoch = None;
    }

    // corrector ============================================================================

    fn apply_corrector(&mut self, state: &mut SimState, hooks: &mut Hooks, inv: f64, dt: f64) {
        match self.settings.corrector {
            3 => {
                self.corrector_z(state, hooks, A1 * dt, -inv * B31 * dt);
                self.corrector_z(state, hooks, -A1 * dt, inv * B31 * dt);
            }
            5 => {
                self.corrector_z(state, hooks, -A2 * dt, -inv * B51 * dt);
                self.corrector_z(state, hooks, -A1 * dt, -inv * B52 * dt);
                self.corrector_z(state, hooks, A1 * dt, inv * B52 * dt);
                self.corrector_z(state, hooks, A2 * dt, inv * B51 * dt);
            }
            7 => {
                self.corrector_z(state, hooks, -A3 * dt, -inv * B71 * dt);
                self.corrector_z(state, hooks, -A2 * dt, -inv * B72 * dt);
                self.corrector_z(state, hooks, -A1 * dt, -inv * B73 * dt);
                self.corrector_z(state, hooks, A1 * dt, inv * B73 * dt);
                self.corrector_z(state, hooks, A2 * dt, inv * B72 * dt);
                self.corrector_z(state, hooks, A3 * dt, inv * B71 * dt);
            }
            _ => {}
        }
    }

    // Z(a, b) = K(a) I(-b) K(-2a) I(b) K(a), applied to the Jacobi cache
    fn corrector_z(&mut self, state: &mut SimState, hooks: &mut Hooks, a: f64, b: f64) {
        self.jacobi.kepler_step(state.G, a);
        self.interaction_from_positions(state, hooks, -b);
        self.jacobi.kepler_step(state.G, -2.0 * a);
        self.interaction_from_positions(state, hooks, b);
        self.jacobi.kepler_step(state.G, a);
    }

    fn interaction_from_positions(&mut self, state: &mut SimState, hooks: &mut Hooks, dt: f64) {
        self.jacobi.to_inertial_pos(state.particles.real_mut());
        interaction_accelerations(state, hooks);
        self.jacobi.accelerations_from_inertial(state.particles.real());
        self.jacobi.interaction_step(state.G, dt);
    }
}
