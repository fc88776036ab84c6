//! Configuration types for loading simulation scenarios from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! simulation scenario. A scenario consists of:
//!
//! - [`EngineConfig`]     – integrator, gravity, collision and boundary choices
//! - [`ParametersConfig`] – numerical parameters and physical constants
//! - [`BodyConfig`]       – initial state for each body
//! - [`ScenarioConfig`]   – top-level wrapper used to load a scenario from YAML
//!
//! Everything except `bodies` may be omitted; missing values take the
//! engine defaults (`G = 1`, IAS15, direct gravity, no collisions, no
//! boundary, `theta = 0.5`).
//!
//! # YAML format
//!
//! ```yaml
//! engine:
//!   integrator: "whfast"    # leapfrog | wh | whfast | sei | ias15 | hybrid
//!   whfast:
//!     corrector: 5
//!     safe_mode: false
//!   gravity: "direct"       # none | direct | compensated | tree
//!   collision: "none"       # none | direct | tree
//!   boundary: "none"        # none | open | periodic | shear
//!   theta: 0.5
//!   box:
//!     root_size: 10.0
//!     root_n: [1, 1, 1]
//!     nghost: [0, 0, 0]
//!
//! parameters:
//!   t_end: 62.83            # 0.0 integrates until an exit request
//!   dt: 0.01
//!   G: 1.0
//!   softening: 0.0
//!   megno_delta: 1.0e-6     # omit to disable MEGNO
//!
//! bodies:
//!   - x: [0.0, 0.0, 0.0]
//!     v: [0.0, 0.0, 0.0]
//!     m: 1.0
//!   - x: [1.0, 0.0, 0.0]
//!     v: [0.0, 1.0, 0.0]
//!     m: 1.0e-3
//!     radius: 0.01
//!     id: 1
//! ```
//!
//! `Scenario::build` maps this configuration onto a ready `Simulation`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;

use crate::error::SimResult;
use crate::simulation::boundary::Boundary;
use crate::simulation::collision::CollisionMode;
use crate::simulation::forces::GravityMode;
use crate::simulation::integrator::{HybridSettings, Ias15Settings, IntegratorKind, WhFastSettings};

/// Root-grid layout of the simulation volume
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BoxConfig {
    pub root_size: f64,      // side length of one root box
    pub root_n: [usize; 3],  // root boxes per axis
    #[serde(default)]
    pub nghost: [usize; 3],  // ghost rings per axis (periodic / shear only)
}

/// High-level engine configuration
/// Controls the structure of the simulation
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub integrator: IntegratorKind, // Time integrator used for advancing the system state
    pub whfast: WhFastSettings,     // Corrector order and safe mode, also used by hybrid
    pub ias15: Ias15Settings,       // Tolerance and minimum step, also used by hybrid
    pub hybrid: HybridSettings,     // Encounter threshold
    pub gravity: GravityMode,
    pub collision: CollisionMode,
    pub boundary: Boundary,
    pub theta: f64, // Barnes-Hut opening angle
    #[serde(rename = "box")]
    pub box_config: Option<BoxConfig>,
    pub omega: Option<f64>,   // epicyclic frequency (SEI, shearing sheet)
    pub omega_z: Option<f64>, // vertical frequency, defaults to omega
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            integrator: IntegratorKind::default(),
            whfast: WhFastSettings::default(),
            ias15: Ias15Settings::default(),
            hybrid: HybridSettings::default(),
            gravity: GravityMode::default(),
            collision: CollisionMode::default(),
            boundary: Boundary::default(),
            theta: 0.5,
            box_config: None,
            omega: None,
            omega_z: None,
        }
    }
}

/// Global numerical and physical parameters for a scenario
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
#[allow(non_snake_case)]
pub struct ParametersConfig {
    pub t_end: f64,     // end time, 0.0 means "until an exit request"
    pub dt: f64,        // (initial) step size, negative integrates backwards
    pub G: f64,         // gravitational constant
    pub softening: f64, // softening length, prevents singular forces at small separations
    pub exact_finish_time: bool,
    pub n_active: Option<usize>, // only the first n_active bodies source gravity
    pub gravity_ignore_10: bool, // skip the 0-1 pair (WH-style splittings)
    pub minimum_collision_velocity: f64,
    pub megno_delta: Option<f64>, // initial shadow displacement, enables MEGNO
    pub megno_seed: u64,          // deterministic seed to make runs reproducible
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            t_end: 0.0,
            dt: 0.001,
            G: 1.0,
            softening: 0.0,
            exact_finish_time: true,
            n_active: None,
            gravity_ignore_10: false,
            minimum_collision_velocity: 0.0,
            megno_delta: None,
            megno_seed: 42,
        }
    }
}

impl ParametersConfig {
    /// `t_end` as an integration limit
    pub fn tmax(&self) -> Option<f64> {
        if self.t_end == 0.0 {
            None
        } else {
            Some(self.t_end)
        }
    }
}

/// Configuration for a single body's initial state
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BodyConfig {
    pub x: [f64; 3], // Initial position vector `x` in simulation units
    pub v: [f64; 3], // Initial velocity vector `v` in simulation units per time unit
    pub m: f64,      // Mass of the body, 0 for test particles
    #[serde(default)]
    pub radius: f64, // Radius of the body, used for collisions
    #[serde(default)]
    pub id: i64,
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub engine: EngineConfig, // Engine-level configuration
    #[serde(default)]
    pub parameters: ParametersConfig, // Global numerical and physical parameters
    pub bodies: Vec<BodyConfig>, // List of bodies that define the initial state of the system
}

impl ScenarioConfig {
    pub fn from_reader<R: Read>(reader: R) -> SimResult<Self> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_yaml(yaml: &str) -> SimResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> SimResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}
