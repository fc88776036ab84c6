//! Binary snapshots
//!
//! A snapshot is a small header (`MAGIC`, `VERSION`) followed by one
//! `bincode` record holding every scalar of the state, the integrator
//! configuration and the whole particle buffer, shadows included. Trees,
//! collision buffers, force scratch, integrator caches and hooks are never
//! written; they are rebuilt (or left unset) after loading.

use std::io::{Read, Write};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::simulation::boundary::{Boundary, BoxGeometry};
use crate::simulation::collision::CollisionMode;
use crate::simulation::forces::GravityMode;
use crate::simulation::integrator::IntegratorSettings;
use crate::simulation::megno::MegnoStats;
use crate::simulation::states::{Particle, ParticleStore};
use crate::simulation::world::SimState;

pub const MAGIC: [u8; 8] = *b"GRAVSIM\0";
pub const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    t: f64,
    G: f64,
    softening: f64,
    dt: f64,
    dt_last_done: f64,
    exact_finish_time: bool,
    force_is_velocity_dependent: bool,
    gravity_ignore_10: bool,
    opening_angle2: f64,
    gravity: GravityMode,
    collision: CollisionMode,
    boundary: Boundary,
    geometry: Option<BoxGeometry>,
    omega: f64,
    omega_z: Option<f64>,
    n_active: Option<usize>,
    collisions_nlog: u64,
    collisions_plog: f64,
    max_radius: [f64; 2],
    minimum_collision_velocity: f64,
    megno: MegnoStats,
    steps_done: u64,
    integrator: IntegratorSettings,
    n_var: usize,
    particles: Vec<Particle>,
}

/// Write `state` and the integrator configuration to `writer`.
pub fn write<W: Write>(mut writer: W, state: &SimState, integrator: &IntegratorSettings) -> SimResult<()> {
    let header = Header {
        magic: MAGIC,
        version: VERSION,
    };
    bincode::serialize_into(&mut writer, &header)?;

    let record = Record {
        t: state.t,
        G: state.G,
        softening: state.softening,
        dt: state.dt,
        dt_last_done: state.dt_last_done,
        exact_finish_time: state.exact_finish_time,
        force_is_velocity_dependent: state.force_is_velocity_dependent,
        gravity_ignore_10: state.gravity_ignore_10,
        opening_angle2: state.opening_angle2,
        gravity: state.gravity,
        collision: state.collision,
        boundary: state.boundary,
        geometry: state.geometry,
        omega: state.omega,
        omega_z: state.omega_z,
        n_active: state.n_active,
        collisions_nlog: state.collisions_nlog,
        collisions_plog: state.collisions_plog,
        max_radius: state.max_radius,
        minimum_collision_velocity: state.minimum_collision_velocity,
        megno: state.megno,
        steps_done: state.steps_done,
        integrator: *integrator,
        n_var: state.particles.n_var(),
        particles: state.particles.as_slice().to_vec(),
    };
    bincode::serialize_into(&mut writer, &record)?;
    writer.flush()?;

    debug!(
        "snapshot written: t = {:.6e}, {} particle(s) ({} shadow(s))",
        record.t,
        record.particles.len(),
        record.n_var
    );
    Ok(())
}

/// Read a snapshot written by [`write`].
pub fn read<R: Read>(mut reader: R) -> SimResult<(SimState, IntegratorSettings)> {
    let header: Header = bincode::deserialize_from(&mut reader)
        .map_err(|e| SimError::Snapshot(format!("unreadable header: {e}")))?;
    if header.magic != MAGIC {
        return Err(SimError::Snapshot("not a gravsim snapshot".into()));
    }
    if header.version != VERSION {
        return Err(SimError::Snapshot(format!(
            "unsupported snapshot version {} (expected {VERSION})",
            header.version
        )));
    }

    let record: Record = bincode::deserialize_from(&mut reader)?;
    let n_total = record.particles.len();
    let n_var = record.n_var;
    let particles = ParticleStore::from_parts(record.particles, n_var).ok_or_else(|| {
        SimError::Snapshot(format!("{n_var} shadow(s) declared for {n_total} particle(s)"))
    })?;
    if n_var != 0 && n_var * 2 != n_total {
        return Err(SimError::Snapshot(format!(
            "{n_var} shadow(s) do not pair with {} real particle(s)",
            n_total - n_var
        )));
    }
    if let Some(n_active) = record.n_active {
        if n_active > particles.n_real() {
            return Err(SimError::Snapshot(format!(
                "n_active = {n_active} exceeds {} real particle(s)",
                particles.n_real()
            )));
        }
    }

    let state = SimState {
        t: record.t,
        G: record.G,
        softening: record.softening,
        dt: record.dt,
        dt_last_done: record.dt_last_done,
        exact_finish_time: record.exact_finish_time,
        force_is_velocity_dependent: record.force_is_velocity_dependent,
        gravity_ignore_10: record.gravity_ignore_10,
        opening_angle2: record.opening_angle2,
        gravity: record.gravity,
        collision: record.collision,
        boundary: record.boundary,
        geometry: record.geometry,
        omega: record.omega,
        omega_z: record.omega_z,
        n_active: record.n_active,
        collisions_nlog: record.collisions_nlog,
        collisions_plog: record.collisions_plog,
        max_radius: record.max_radius,
        minimum_collision_velocity: record.minimum_collision_velocity,
        megno: record.megno,
        particles,
        steps_done: record.steps_done,
        ..SimState::default()
    };

    debug!(
        "snapshot read: t = {:.6e}, {} particle(s)",
        state.t,
        state.particles.len()
    );
    Ok((state, record.integrator))
}
