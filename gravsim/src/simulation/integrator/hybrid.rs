//! WHFast away from encounters, IAS15 during them
//!
//! Before every step the smallest separation between two planets, in units
//! of their summed Hill radii, is compared against `switch_ratio`:
//!
//! `min r_ij² / (rh_i + rh_j)²`, `rh_i = |x_i - x_0| (m_i / 3 m_0)^(1/3)`
//!
//! Below the threshold the step is taken with IAS15, otherwise with WHFast.
//! The symplectic `dt` is remembered on the way in and restored on the way
//! out, since IAS15 adapts it.

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::simulation::hooks::Hooks;
use crate::simulation::integrator::ias15::{Ias15, Ias15Settings};
use crate::simulation::integrator::whfast::{WhFast, WhFastSettings};
use crate::simulation::world::SimState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSettings {
    /// Squared separation in units of mutual Hill radii
    pub switch_ratio: f64,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self { switch_ratio: 8.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HybridMode {
    #[default]
    Symplectic,
    HighAccuracy,
}

#[derive(Debug, Clone, Default)]
pub struct Hybrid {
    pub settings: HybridSettings,
    pub whfast: WhFast,
    pub ias15: Ias15,
    pub switches: u64,
    mode: HybridMode,
    dt_symplectic: f64,
}

impl Hybrid {
    pub fn new(settings: HybridSettings, whfast: WhFastSettings, ias15: Ias15Settings) -> Self {
        Self {
            settings,
            whfast: WhFast::new(whfast),
            ias15: Ias15::new(ias15),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> HybridMode {
        self.mode
    }

    pub fn advance(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        let ratio = min_hill_ratio(state);
        let encounter = ratio < self.settings.switch_ratio;

        match (self.mode, encounter) {
            (HybridMode::Symplectic, true) => {
                self.whfast.synchronize(state, hooks)?;
                self.dt_symplectic = state.dt;
                self.ias15.reset();
                self.mode = HybridMode::HighAccuracy;
                self.switches += 1;
                info!("hybrid: close encounter at t = {:.6e} (ratio {ratio:.3}), switching to IAS15", state.t);
            }
            (HybridMode::HighAccuracy, false) => {
                state.dt = self.dt_symplectic;
                self.ias15.reset();
                self.whfast.reset();
                self.mode = HybridMode::Symplectic;
                self.switches += 1;
                info!("hybrid: encounter over at t = {:.6e}, back to WHFast", state.t);
            }
            _ => {}
        }

        match self.mode {
            HybridMode::Symplectic => self.whfast.advance(state, hooks),
            HybridMode::HighAccuracy => self.ias15.advance(state, hooks),
        }
    }

    pub fn synchronize(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        match self.mode {
            HybridMode::Symplectic => self.whfast.synchronize(state, hooks),
            HybridMode::HighAccuracy => Ok(()),
        }
    }

    pub fn particles_modified(&mut self) {
        self.whfast.particles_modified();
        self.ias15.particles_modified();
    }

    pub fn reset(&mut self) {
        self.whfast.reset();
        self.ias15.reset();
        self.mode = HybridMode::Symplectic;
        self.dt_symplectic = 0.0;
    }
}

/// Smallest `r_ij² / (rh_i + rh_j)²` over planet pairs; infinite when
/// there is no pair or no central mass.
pub fn min_hill_ratio(state: &SimState) -> f64 {
    let particles = state.particles.real();
    let n_active = state.n_active_count();
    let Some(central) = particles.first() else {
        return f64::INFINITY;
    };
    if central.m <= 0.0 {
        return f64::INFINITY;
    }

    let hill = |i: usize| {
        let p = &particles[i];
        (p.x - central.x).norm() * (p.m / (3.0 * central.m)).cbrt()
    };

    let mut min_ratio = f64::INFINITY;
    for i in 1..n_active {
        let rh_i = hill(i);
        for j in (i + 1)..particles.len() {
            let rh = rh_i + hill(j);
            if rh <= 0.0 {
                continue;
            }
            let r2 = (particles[i].x - particles[j].x).norm_squared();
            min_ratio = min_ratio.min(r2 / (rh * rh));
        }
    }
    min_ratio
}
