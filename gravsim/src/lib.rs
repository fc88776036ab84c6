#![allow(non_snake_case)]

pub mod error;
pub mod simulation;
pub mod configuration;
pub mod benchmark;

pub use error::{SimError, SimResult};

pub use simulation::states::{NVec3, Particle, ParticleStore};
pub use simulation::world::SimState;
pub use simulation::engine::{IntegrationStatus, Simulation};
pub use simulation::boundary::{Boundary, BoxGeometry, GhostBox};
pub use simulation::forces::{Acceleration, GravityMode};
pub use simulation::collision::{Collision, CollisionMode, CollisionOutcome};
pub use simulation::hooks::{AdditionalForces, CollisionResolver, Heartbeat, Hooks, PostTimestep, Restitution};
pub use simulation::integrator::{
    HybridSettings, Ias15Settings, Integrator, IntegratorKind, IntegratorSettings, WhFastSettings,
};
pub use simulation::orbit::Orbit;
pub use simulation::scenario::Scenario;

pub use configuration::config::{BodyConfig, BoxConfig, EngineConfig, ParametersConfig, ScenarioConfig};

pub use benchmark::benchmark::{bench_gravity, bench_integrators};
