use std::time::Instant;

use crate::error::SimResult;
use crate::simulation::engine::Simulation;
use crate::simulation::forces::GravityMode;
use crate::simulation::hooks::Hooks;
use crate::simulation::integrator::{IntegratorKind, IntegratorSettings};
use crate::simulation::states::{NVec3, Particle};
use crate::simulation::world::SimState;

/// Helper to build a deterministic cloud of `n` equal masses
fn make_cloud(n: usize) -> SimState {
    let mut state = SimState::new();
    state.G = 0.1;
    state.softening = 1e-2;

    for i in 0..n {
        let i_f = i as f64;
        // deterministic positions, no rand needed
        let x = NVec3::new(
            (i_f * 0.37).sin() * 5.0,
            (i_f * 0.13).cos() * 5.0,
            (i_f * 0.07).sin() * 5.0,
        );
        state.add(Particle::new(1.0 / n as f64, x, NVec3::zeros()).with_id(i as i64));
    }
    state
}

/// Time one force evaluation per gravity mode for a range of `n`
pub fn bench_gravity() {
    let ns = [200, 400, 800, 1600, 3200, 6400];
    let modes = [GravityMode::Direct, GravityMode::Compensated, GravityMode::Tree];
    let mut hooks = Hooks::default();

    println!("N,direct_ms,compensated_ms,tree_ms");
    for n in ns {
        let mut timings = Vec::with_capacity(modes.len());
        for mode in modes {
            let mut state = make_cloud(n);
            state.gravity = mode;

            // Warm up
            state.update_acceleration(&mut hooks);

            let t0 = Instant::now();
            state.update_acceleration(&mut hooks);
            timings.push(t0.elapsed().as_secs_f64() * 1000.0);
        }
        println!("{},{:.6},{:.6},{:.6}", n, timings[0], timings[1], timings[2]);
    }
}

/// Time a planetary system (one star, `n - 1` light planets on circular
/// orbits) under each integrator and report the relative energy error
pub fn bench_integrators(n: usize, tmax: f64) -> SimResult<()> {
    let kinds = [
        IntegratorKind::Leapfrog,
        IntegratorKind::Wh,
        IntegratorKind::WhFast,
        IntegratorKind::Ias15,
        IntegratorKind::Hybrid,
    ];

    println!("integrator,steps,ms,rel_energy_error");
    for kind in kinds {
        let settings = IntegratorSettings {
            kind,
            ..IntegratorSettings::default()
        };
        let mut sim = Simulation::with_integrator(&settings);
        sim.state.dt = 0.01;
        sim.add(Particle::new(1.0, NVec3::zeros(), NVec3::zeros()));
        for i in 1..n {
            let a = 1.0 + 0.5 * i as f64;
            let phase = 2.399_963 * i as f64;
            let vc = (sim.state.G / a).sqrt();
            sim.add(Particle::new(
                1e-6,
                NVec3::new(a * phase.cos(), a * phase.sin(), 0.0),
                NVec3::new(-vc * phase.sin(), vc * phase.cos(), 0.0),
            ));
        }
        sim.state.move_to_com();

        let e0 = sim.total_energy();
        let t0 = Instant::now();
        sim.integrate(Some(tmax))?;
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        let e1 = sim.total_energy();

        println!(
            "{},{},{:.3},{:.3e}",
            sim.integrator().name(),
            sim.state.steps_done,
            ms,
            ((e1 - e0) / e0).abs()
        );
    }
    Ok(())
}
