//! Host callbacks
//!
//! One trait per capability, each implemented for plain closures so a host
//! can write `sim.hooks.heartbeat = Some(Box::new(|s: &mut SimState| ...))`.
//! Unset hooks fall back to a no-op, except the collision resolver (hard
//! spheres) and restitution (perfectly elastic).

use std::fmt;

use crate::simulation::collision::{Collision, CollisionOutcome};
use crate::simulation::states::Particle;
use crate::simulation::world::SimState;

/// Extra accelerations, added after gravity on every force evaluation.
/// Must only write `a`: positions are mid-step at this point.
pub trait AdditionalForces: Send {
    fn apply(&mut self, t: f64, particles: &mut [Particle]);
}

impl<F> AdditionalForces for F
where
    F: FnMut(f64, &mut [Particle]) + Send,
{
    fn apply(&mut self, t: f64, particles: &mut [Particle]) {
        self(t, particles)
    }
}

/// Runs after every step on synchronized coordinates. Changes made here are
/// picked up by the integrator before the next step.
pub trait PostTimestep: Send {
    fn apply(&mut self, state: &mut SimState);
}

impl<F> PostTimestep for F
where
    F: FnMut(&mut SimState) + Send,
{
    fn apply(&mut self, state: &mut SimState) {
        self(state)
    }
}

/// Called once before the first step and once after every step
pub trait Heartbeat: Send {
    fn beat(&mut self, state: &mut SimState);
}

impl<F> Heartbeat for F
where
    F: FnMut(&mut SimState) + Send,
{
    fn beat(&mut self, state: &mut SimState) {
        self(state)
    }
}

/// Replaces the hard-sphere model. Owns the whole outcome: velocity changes,
/// merging, and which particle (if any) disappears.
pub trait CollisionResolver: Send {
    fn resolve(&mut self, t: f64, particles: &mut [Particle], collision: &Collision) -> CollisionOutcome;
}

impl<F> CollisionResolver for F
where
    F: FnMut(f64, &mut [Particle], &Collision) -> CollisionOutcome + Send,
{
    fn resolve(&mut self, t: f64, particles: &mut [Particle], collision: &Collision) -> CollisionOutcome {
        self(t, particles, collision)
    }
}

/// Coefficient of restitution as a function of the normal impact speed
pub trait Restitution: Send {
    fn coefficient(&mut self, impact_speed: f64) -> f64;
}

impl<F> Restitution for F
where
    F: FnMut(f64) -> f64 + Send,
{
    fn coefficient(&mut self, impact_speed: f64) -> f64 {
        self(impact_speed)
    }
}

#[derive(Default)]
pub struct Hooks {
    pub additional_forces: Option<Box<dyn AdditionalForces>>,
    pub post_timestep: Option<Box<dyn PostTimestep>>,
    pub heartbeat: Option<Box<dyn Heartbeat>>,
    pub collision_resolver: Option<Box<dyn CollisionResolver>>,
    pub restitution: Option<Box<dyn Restitution>>,
}

impl Hooks {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("additional_forces", &self.additional_forces.is_some())
            .field("post_timestep", &self.post_timestep.is_some())
            .field("heartbeat", &self.heartbeat.is_some())
            .field("collision_resolver", &self.collision_resolver.is_some())
            .field("restitution", &self.restitution.is_some())
            .finish()
    }
}
