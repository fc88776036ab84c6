//! Time integrators
//!
//! `Integrator` is a closed set of schemes, each owning its private scratch.
//! All of them advance `SimState` in place through
//! `advance(state, hooks)`, which moves `t` forward by the step actually
//! taken and records it in `dt_last_done`. Accelerations are always
//! recomputed through `SimState::update_acceleration`, so the
//! additional-forces hook runs on every force evaluation.

pub mod hybrid;
pub mod ias15;
pub mod kepler;
pub mod leapfrog;
pub mod sei;
pub mod wh;
pub mod whfast;

use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::simulation::hooks::Hooks;
use crate::simulation::states::Particle;
use crate::simulation::world::SimState;

pub use hybrid::{Hybrid, HybridMode, HybridSettings};
pub use ias15::{Ias15, Ias15Settings};
pub use leapfrog::Leapfrog;
pub use sei::Sei;
pub use wh::Wh;
pub use whfast::{WhFast, WhFastSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntegratorKind {
    #[serde(rename = "leapfrog")]
    Leapfrog,
    #[serde(rename = "wh")]
    Wh,
    #[serde(rename = "whfast")]
    WhFast,
    #[serde(rename = "sei")]
    Sei,
    #[default]
    #[serde(rename = "ias15")]
    Ias15,
    #[serde(rename = "hybrid")]
    Hybrid,
}

/// Integrator choice plus the options of every scheme
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub kind: IntegratorKind,
    pub whfast: WhFastSettings,
    pub ias15: Ias15Settings,
    pub hybrid: HybridSettings,
}

#[derive(Debug, Clone)]
pub enum Integrator {
    Leapfrog(Leapfrog),
    Wh(Wh),
    WhFast(WhFast),
    Sei(Sei),
    Ias15(Ias15),
    Hybrid(Hybrid),
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new(&IntegratorSettings::default())
    }
}

impl Integrator {
    pub fn new(settings: &IntegratorSettings) -> Self {
        match settings.kind {
            IntegratorKind::Leapfrog => Self::Leapfrog(Leapfrog),
            IntegratorKind::Wh => Self::Wh(Wh::new()),
            IntegratorKind::WhFast => Self::WhFast(WhFast::new(settings.whfast)),
            IntegratorKind::Sei => Self::Sei(Sei::new()),
            IntegratorKind::Ias15 => Self::Ias15(Ias15::new(settings.ias15)),
            IntegratorKind::Hybrid => Self::Hybrid(Hybrid::new(
                settings.hybrid,
                settings.whfast,
                settings.ias15,
            )),
        }
    }

    pub fn kind(&self) -> IntegratorKind {
        match self {
            Self::Leapfrog(_) => IntegratorKind::Leapfrog,
            Self::Wh(_) => IntegratorKind::Wh,
            Self::WhFast(_) => IntegratorKind::WhFast,
            Self::Sei(_) => IntegratorKind::Sei,
            Self::Ias15(_) => IntegratorKind::Ias15,
            Self::Hybrid(_) => IntegratorKind::Hybrid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Leapfrog(_) => "leapfrog",
            Self::Wh(_) => "WH",
            Self::WhFast(_) => "WHFast",
            Self::Sei(_) => "SEI",
            Self::Ias15(_) => "IAS15",
            Self::Hybrid(_) => "hybrid",
        }
    }

    /// Settings that rebuild an equivalent (cold) integrator
    pub fn settings(&self) -> IntegratorSettings {
        let mut s = IntegratorSettings {
            kind: self.kind(),
            ..IntegratorSettings::default()
        };
        match self {
            Self::WhFast(w) => s.whfast = w.settings,
            Self::Ias15(i) => s.ias15 = i.settings,
            Self::Hybrid(h) => {
                s.hybrid = h.settings;
                s.whfast = h.whfast.settings;
                s.ias15 = h.ias15.settings;
            }
            _ => {}
        }
        s
    }

    /// Take one step.
    pub fn advance(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        match self {
            Self::Leapfrog(i) => i.advance(state, hooks),
            Self::Wh(i) => i.advance(state, hooks),
            Self::WhFast(i) => i.advance(state, hooks),
            Self::Sei(i) => i.advance(state, hooks),
            Self::Ias15(i) => i.advance(state, hooks),
            Self::Hybrid(i) => i.advance(state, hooks),
        }
    }

    /// Bring positions and velocities to a consistent time. Only WHFast (and
    /// hybrid while symplectic) can be out of sync between steps.
    pub fn synchronize(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        match self {
            Self::WhFast(i) => i.synchronize(state, hooks),
            Self::Hybrid(i) => i.synchronize(state, hooks),
            _ => Ok(()),
        }
    }

    /// Drop every cache; the next step starts from the particles alone.
    pub fn reset(&mut self) {
        match self {
            Self::Leapfrog(_) => {}
            Self::Wh(i) => i.reset(),
            Self::WhFast(i) => i.reset(),
            Self::Sei(i) => i.reset(),
            Self::Ias15(i) => i.reset(),
            Self::Hybrid(i) => i.reset(),
        }
    }

    /// The particles were changed between steps.
    pub fn particles_modified(&mut self) {
        match self {
            Self::WhFast(i) => i.particles_modified(),
            Self::Ias15(i) => i.particles_modified(),
            Self::Hybrid(i) => i.particles_modified(),
            _ => {}
        }
    }
}

/// `x += dt * v`
pub(crate) fn drift(particles: &mut [Particle], dt: f64) {
    for p in particles.iter_mut() {
        p.x += dt * p.v;
    }
}

/// `v += dt * a`
pub(crate) fn kick(particles: &mut [Particle], dt: f64) {
    for p in particles.iter_mut() {
        p.v += dt * p.a;
    }
}
