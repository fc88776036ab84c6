//! Build fully-initialized simulations from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a `Scenario`: a
//! `Simulation` with its integrator, force model, box and bodies set up,
//! plus the integration limit the scenario asked for.

use log::info;

use crate::configuration::config::{BodyConfig, ScenarioConfig};
use crate::error::{SimError, SimResult};
use crate::simulation::engine::{IntegrationStatus, Simulation};
use crate::simulation::integrator::IntegratorSettings;
use crate::simulation::states::{NVec3, Particle};

/// A ready-to-run simulation and how long to run it
#[derive(Debug)]
pub struct Scenario {
    pub simulation: Simulation,
    pub tmax: Option<f64>, // `None` integrates until an exit request
}

impl Scenario {
    pub fn build(cfg: ScenarioConfig) -> SimResult<Self> {
        let e_cfg = cfg.engine;
        let p_cfg = cfg.parameters;

        if !(e_cfg.theta >= 0.0) {
            return Err(SimError::config(format!(
                "opening angle must be non-negative, got {}",
                e_cfg.theta
            )));
        }
        if let Some(n_active) = p_cfg.n_active {
            if n_active > cfg.bodies.len() {
                return Err(SimError::config(format!(
                    "n_active = {n_active} but only {} bodies are defined",
                    cfg.bodies.len()
                )));
            }
        }

        // Integrator (runtime) from EngineConfig
        let settings = IntegratorSettings {
            kind: e_cfg.integrator,
            whfast: e_cfg.whfast,
            ias15: e_cfg.ias15,
            hybrid: e_cfg.hybrid,
        };
        let mut simulation = Simulation::with_integrator(&settings);

        // State: force model, box, constants
        let state = &mut simulation.state;
        state.G = p_cfg.G;
        state.softening = p_cfg.softening;
        state.dt = p_cfg.dt;
        state.exact_finish_time = p_cfg.exact_finish_time;
        state.gravity_ignore_10 = p_cfg.gravity_ignore_10;
        state.minimum_collision_velocity = p_cfg.minimum_collision_velocity;
        state.gravity = e_cfg.gravity;
        state.collision = e_cfg.collision;
        state.boundary = e_cfg.boundary;
        state.opening_angle2 = e_cfg.theta * e_cfg.theta;
        if let Some(omega) = e_cfg.omega {
            state.omega = omega;
        }
        state.omega_z = e_cfg.omega_z;
        if let Some(b) = e_cfg.box_config {
            state.configure_box(b.root_size, b.root_n[0], b.root_n[1], b.root_n[2])?;
            state.set_ghost_boxes(b.nghost[0], b.nghost[1], b.nghost[2])?;
        }
        state.validate()?;

        // Bodies: map `BodyConfig` -> runtime `Particle`
        for bc in &cfg.bodies {
            simulation.add(particle_from(bc));
        }
        simulation.state.n_active = p_cfg.n_active;

        if let Some(delta) = p_cfg.megno_delta {
            simulation.megno_init(delta, p_cfg.megno_seed);
        }

        info!(
            "scenario: {} bodies, {} integrator, {:?} gravity, {:?} collisions, {:?} boundary",
            cfg.bodies.len(),
            simulation.integrator().name(),
            simulation.state.gravity,
            simulation.state.collision,
            simulation.state.boundary,
        );

        Ok(Self {
            simulation,
            tmax: p_cfg.tmax(),
        })
    }

    /// Run to the scenario's end time.
    pub fn run(&mut self) -> SimResult<IntegrationStatus> {
        self.simulation.integrate(self.tmax)
    }
}

fn particle_from(bc: &BodyConfig) -> Particle {
    Particle::new(bc.m, NVec3::from(bc.x), NVec3::from(bc.v))
        .with_radius(bc.radius)
        .with_id(bc.id)
}
