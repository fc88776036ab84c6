//! The simulation and its step loop
//!
//! `Simulation` ties the state, the active integrator and the host hooks
//! together. One `step` is:
//!
//! 1. heartbeat (only before the very first step)
//! 2. integrator advance, with the additional-forces hook inside every
//!    force evaluation
//! 3. post-timestep hook, on synchronized coordinates
//! 4. boundary check
//! 5. collision search and resolution
//! 6. heartbeat
//! 7. MEGNO update

use std::io::{Read, Write};

use log::{info, warn};

use crate::error::SimResult;
use crate::simulation::boundary::{boundary_check, Boundary};
use crate::simulation::collision::{self, CollisionMode};
use crate::simulation::hooks::Hooks;
use crate::simulation::integrator::{Integrator, IntegratorSettings};
use crate::simulation::snapshot;
use crate::simulation::states::Particle;
use crate::simulation::world::SimState;

/// Why `integrate` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStatus {
    ReachedTmax,
    ExitRequested,
    NoParticles,
}

#[derive(Debug, Default)]
pub struct Simulation {
    pub state: SimState,
    pub hooks: Hooks,
    integrator: Integrator,
    heartbeat_started: bool,
}

impl Simulation {
    /// Empty simulation: `G = 1`, `dt = 0.001`, IAS15, direct gravity.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integrator(settings: &IntegratorSettings) -> Self {
        Self {
            integrator: Integrator::new(settings),
            ..Self::default()
        }
    }

    /// Swap the integrator. The old one is synchronized first so no
    /// pending half step is lost.
    pub fn set_integrator(&mut self, settings: &IntegratorSettings) -> SimResult<()> {
        self.synchronize()?;
        self.integrator = Integrator::new(settings);
        Ok(())
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    pub fn integrator_mut(&mut self) -> &mut Integrator {
        &mut self.integrator
    }

    // particles ============================================================================

    pub fn add(&mut self, p: Particle) {
        self.state.add(p);
    }

    pub fn remove(&mut self, index: usize, keep_sorted: bool) -> bool {
        self.state.remove(index, keep_sorted)
    }

    pub fn remove_by_id(&mut self, id: i64, keep_sorted: bool) -> bool {
        self.state.remove_by_id(id, keep_sorted)
    }

    pub fn remove_all(&mut self) {
        self.state.remove_all();
        self.integrator.reset();
    }

    /// The real particles
    pub fn particles(&self) -> &[Particle] {
        self.state.particles.real()
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        self.integrator.particles_modified();
        self.state.particles.real_mut()
    }

    // configuration & diagnostics ==========================================================

    pub fn configure_box(&mut self, root_size: f64, nx: usize, ny: usize, nz: usize) -> SimResult<()> {
        self.state.configure_box(root_size, nx, ny, nz)
    }

    pub fn megno_init(&mut self, delta: f64, seed: u64) {
        self.state.megno_init(delta, seed);
        self.integrator.reset();
    }

    pub fn calculate_megno(&self) -> f64 {
        self.state.calculate_megno()
    }

    pub fn calculate_lyapunov(&self) -> f64 {
        self.state.calculate_lyapunov()
    }

    pub fn total_energy(&self) -> f64 {
        self.state.total_energy()
    }

    pub fn synchronize(&mut self) -> SimResult<()> {
        self.integrator.synchronize(&mut self.state, &mut self.hooks)
    }

    pub fn reset_integrator(&mut self) {
        self.integrator.reset();
    }

    // stepping =============================================================================

    /// Advance by one step of the active integrator.
    pub fn step(&mut self) -> SimResult<()> {
        self.state.validate()?;

        if !self.heartbeat_started {
            self.heartbeat_started = true;
            if let Some(heartbeat) = self.hooks.heartbeat.as_mut() {
                heartbeat.beat(&mut self.state);
            }
        }

        self.integrator.advance(&mut self.state, &mut self.hooks)?;

        if self.hooks.post_timestep.is_some() {
            self.integrator.synchronize(&mut self.state, &mut self.hooks)?;
            if let Some(hook) = self.hooks.post_timestep.as_mut() {
                hook.apply(&mut self.state);
            }
            self.integrator.particles_modified();
        }

        if self.state.boundary != Boundary::None || self.state.collision != CollisionMode::None {
            self.integrator.synchronize(&mut self.state, &mut self.hooks)?;
        }
        if self.state.boundary != Boundary::None {
            let outcome = boundary_check(&mut self.state);
            if outcome.wrapped > 0 || outcome.removed > 0 {
                self.integrator.particles_modified();
            }
        }
        if self.state.collision != CollisionMode::None {
            collision::search(&mut self.state);
            if collision::resolve(&mut self.state, &mut self.hooks) > 0 {
                self.integrator.particles_modified();
            }
        }

        if let Some(heartbeat) = self.hooks.heartbeat.as_mut() {
            heartbeat.beat(&mut self.state);
        }
        self.state.megno_update();
        self.state.steps_done += 1;
        Ok(())
    }

    /// Step until `tmax` (forever with `None`), an exit request, or until no
    /// particles are left. With `exact_finish_time` the last step is
    /// shortened to land on `tmax` and the previous `dt` is put back
    /// afterwards. The integrator is synchronized before returning.
    pub fn integrate(&mut self, tmax: Option<f64>) -> SimResult<IntegrationStatus> {
        self.state.validate()?;
        self.state.exit_simulation = false;
        let t_start = self.state.t;
        let steps_start = self.state.steps_done;
        info!(
            "integrating {} particle(s) with {} from t = {:.6e} to {}",
            self.state.n_real(),
            self.integrator.name(),
            t_start,
            tmax.map_or_else(|| "exit request".to_string(), |t| format!("t = {t:.6e}")),
        );

        let mut restore_dt = None;
        let status = loop {
            if self.state.exit_simulation {
                break IntegrationStatus::ExitRequested;
            }
            if self.state.n_real() == 0 {
                warn!("no particles left at t = {:.6e}", self.state.t);
                break IntegrationStatus::NoParticles;
            }

            let mut final_step = None;
            if let Some(tmax) = tmax {
                let dir = self.state.dt.signum();
                let remaining = tmax - self.state.t;
                if remaining * dir <= 0.0 {
                    break IntegrationStatus::ReachedTmax;
                }
                if self.state.exact_finish_time && (self.state.dt - remaining) * dir >= 0.0 {
                    restore_dt.get_or_insert(self.state.dt);
                    self.state.dt = remaining;
                    final_step = Some(remaining);
                }
            }

            self.step()?;

            // land exactly on tmax when the shortened step went through
            if let (Some(tmax), Some(remaining)) = (tmax, final_step) {
                if self.state.dt_last_done == remaining {
                    self.state.t = tmax;
                }
            }
        };

        if let Some(dt) = restore_dt {
            self.state.dt = dt;
        }
        self.synchronize()?;
        info!(
            "stopped at t = {:.6e} after {} step(s): {:?}",
            self.state.t,
            self.state.steps_done - steps_start,
            status
        );
        Ok(status)
    }

    // snapshots ============================================================================

    /// Write a versioned binary snapshot of the state and integrator choice.
    pub fn save_snapshot<W: Write>(&mut self, writer: W) -> SimResult<()> {
        self.synchronize()?;
        snapshot::write(writer, &self.state, &self.integrator.settings())
    }

    /// Restore a simulation from a snapshot; hooks are unset and every
    /// integrator cache starts cold.
    pub fn load_snapshot<R: Read>(reader: R) -> SimResult<Self> {
        let (state, settings) = snapshot::read(reader)?;
        Ok(Self {
            state,
            integrator: Integrator::new(&settings),
            ..Self::default()
        })
    }
}
