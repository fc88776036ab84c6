use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use approx::{assert_abs_diff_eq, assert_relative_eq};

use gravsim::simulation::integrator::kepler::kepler_drift;
use gravsim::{
    Boundary, GravityMode, IntegrationStatus, IntegratorKind, IntegratorSettings, NVec3, Orbit,
    Particle, Scenario, ScenarioConfig, SimError, SimState, Simulation,
};

fn simulation(kind: IntegratorKind, dt: f64) -> Simulation {
    let mut sim = Simulation::with_integrator(&IntegratorSettings {
        kind,
        ..IntegratorSettings::default()
    });
    sim.state.dt = dt;
    sim
}

/// Free particle moving along x, no gravity
fn free_particle(kind: IntegratorKind, dt: f64) -> Simulation {
    let mut sim = simulation(kind, dt);
    sim.state.gravity = GravityMode::None;
    sim.add(Particle::new(1.0, NVec3::zeros(), NVec3::new(1.0, 0.0, 0.0)));
    sim
}

fn binary(kind: IntegratorKind, dt: f64) -> Simulation {
    let mut sim = simulation(kind, dt);
    sim.add(Particle::new(0.5, NVec3::new(-0.5, 0.0, 0.0), NVec3::new(0.0, -0.5, 0.0)).with_id(1));
    sim.add(Particle::new(0.5, NVec3::new(0.5, 0.0, 0.0), NVec3::new(0.0, 0.5, 0.0)).with_id(2));
    sim
}

fn scenario_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios")
}

// ==================================================================================
// Step loop & hooks
// ==================================================================================

#[test]
fn hooks_run_in_step_order() {
    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.01);
    let calls: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&calls);
    sim.hooks.heartbeat = Some(Box::new(move |_s: &mut SimState| {
        log.lock().unwrap().push("heartbeat");
    }));
    let log = Arc::clone(&calls);
    sim.hooks.additional_forces = Some(Box::new(move |_t: f64, _p: &mut [Particle]| {
        log.lock().unwrap().push("forces");
    }));
    let log = Arc::clone(&calls);
    sim.hooks.post_timestep = Some(Box::new(move |_s: &mut SimState| {
        log.lock().unwrap().push("post");
    }));

    sim.step().expect("step");
    assert_eq!(*calls.lock().unwrap(), vec!["heartbeat", "forces", "post", "heartbeat"]);

    sim.step().expect("step");
    assert_eq!(calls.lock().unwrap().len(), 7);
}

#[test]
fn post_timestep_changes_are_seen_by_the_next_step() {
    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.1);
    sim.hooks.post_timestep = Some(Box::new(|s: &mut SimState| {
        for p in s.particles.real_mut() {
            p.v = NVec3::zeros();
        }
    }));

    sim.step().expect("step");
    let x = sim.particles()[0].x;
    sim.step().expect("step");
    assert_eq!(sim.particles()[0].x, x);
}

#[test]
fn exact_finish_time_lands_on_tmax() {
    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.03);

    let status = sim.integrate(Some(1.0)).expect("integration");
    assert_eq!(status, IntegrationStatus::ReachedTmax);
    assert_eq!(sim.state.t, 1.0);
    assert_eq!(sim.state.dt, 0.03);
    assert_eq!(sim.state.steps_done, 34);
    assert_relative_eq!(sim.particles()[0].x.x, 1.0, max_relative = 1e-12);
}

#[test]
fn without_exact_finish_time_the_last_step_overshoots() {
    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.03);
    sim.state.exact_finish_time = false;

    sim.integrate(Some(1.0)).expect("integration");
    assert!(sim.state.t > 1.0);
    assert!(sim.state.t < 1.0 + 0.03 + 1e-12);
    assert_eq!(sim.state.dt, 0.03);
}

#[test]
fn heartbeat_can_stop_the_integration() {
    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.01);
    sim.hooks.heartbeat = Some(Box::new(|s: &mut SimState| {
        if s.t > 0.5 {
            s.exit_simulation = true;
        }
    }));

    let status = sim.integrate(None).expect("integration");
    assert_eq!(status, IntegrationStatus::ExitRequested);
    assert!(sim.state.t > 0.5 && sim.state.t < 0.52);

    // a new call clears the request
    sim.hooks.heartbeat = None;
    let status = sim.integrate(Some(1.0)).expect("integration");
    assert_eq!(status, IntegrationStatus::ReachedTmax);
}

#[test]
fn integrate_without_particles() {
    let mut sim = Simulation::new();
    assert_eq!(sim.integrate(Some(1.0)).expect("integration"), IntegrationStatus::NoParticles);

    // everything escapes through an open boundary
    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.01);
    sim.configure_box(1.0, 1, 1, 1).expect("valid box");
    sim.state.boundary = Boundary::Open;
    assert_eq!(sim.integrate(Some(10.0)).expect("integration"), IntegrationStatus::NoParticles);
    assert!(sim.state.t > 0.5 && sim.state.t < 0.52);
}

#[test]
fn invalid_configuration_is_rejected_before_stepping() {
    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.01);
    sim.state.boundary = Boundary::Periodic;
    assert!(matches!(sim.integrate(Some(1.0)), Err(SimError::Config { .. })));
    assert_eq!(sim.state.t, 0.0);

    let mut sim = free_particle(IntegratorKind::Leapfrog, 0.0);
    assert!(matches!(sim.step(), Err(SimError::Config { .. })));
}

#[test]
fn binary_returns_after_one_period() {
    for kind in [IntegratorKind::Ias15, IntegratorKind::Wh, IntegratorKind::WhFast] {
        let mut sim = binary(kind, 0.01);
        let start: Vec<NVec3> = sim.particles().iter().map(|p| p.x).collect();

        sim.integrate(Some(TAU)).expect("integration");
        for (a, p) in start.iter().zip(sim.particles()) {
            assert!((a - p.x).norm() < 1e-8, "{kind:?}: {a:?} vs {:?}", p.x);
        }
    }
}

#[test]
fn remove_all_resets_the_integrator() {
    let mut sim = binary(IntegratorKind::WhFast, 0.01);
    sim.integrate(Some(1.0)).expect("integration");
    sim.remove_all();
    assert!(sim.particles().is_empty());

    // fresh particles, fresh caches
    sim.state.t = 0.0;
    sim.add(Particle::new(0.5, NVec3::new(-0.5, 0.0, 0.0), NVec3::new(0.0, -0.5, 0.0)));
    sim.add(Particle::new(0.5, NVec3::new(0.5, 0.0, 0.0), NVec3::new(0.0, 0.5, 0.0)));
    sim.integrate(Some(TAU)).expect("integration");
    assert!((sim.particles()[1].x - NVec3::new(0.5, 0.0, 0.0)).norm() < 1e-8);
}

#[test]
fn switching_integrators_keeps_the_state() {
    let mut sim = binary(IntegratorKind::WhFast, 0.01);
    sim.integrate(Some(1.0)).expect("integration");
    let e0 = sim.total_energy();

    sim.set_integrator(&IntegratorSettings {
        kind: IntegratorKind::Ias15,
        ..IntegratorSettings::default()
    })
    .expect("switch");
    assert_eq!(sim.integrator().kind(), IntegratorKind::Ias15);
    sim.integrate(Some(2.0)).expect("integration");
    assert_relative_eq!(sim.total_energy(), e0, max_relative = 1e-6);
}

// ==================================================================================
// Snapshots
// ==================================================================================

fn snapshot_bytes(sim: &mut Simulation) -> Vec<u8> {
    let mut buf = Vec::new();
    sim.save_snapshot(&mut buf).expect("save");
    buf
}

#[test]
fn snapshot_continues_bit_identically() {
    let mut sim = binary(IntegratorKind::Leapfrog, 0.01);
    sim.integrate(Some(1.0)).expect("integration");

    let bytes = snapshot_bytes(&mut sim);
    let mut restored = Simulation::load_snapshot(&bytes[..]).expect("load");
    assert_eq!(restored.state.t, sim.state.t);
    assert_eq!(restored.state.steps_done, sim.state.steps_done);
    assert_eq!(restored.integrator().settings(), sim.integrator().settings());

    sim.integrate(Some(2.0)).expect("original");
    restored.integrate(Some(2.0)).expect("restored");
    for (a, b) in sim.particles().iter().zip(restored.particles()) {
        assert_eq!(a.x, b.x);
        assert_eq!(a.v, b.v);
        assert_eq!(a.id, b.id);
    }
}

#[test]
fn snapshot_keeps_megno_shadows() {
    let mut sim = binary(IntegratorKind::Leapfrog, 0.01);
    sim.megno_init(1e-8, 5);
    sim.integrate(Some(1.0)).expect("integration");

    let bytes = snapshot_bytes(&mut sim);
    let mut restored = Simulation::load_snapshot(&bytes[..]).expect("load");
    assert_eq!(restored.state.particles.n_var(), 2);
    assert_eq!(restored.state.megno, sim.state.megno);

    sim.integrate(Some(2.0)).expect("original");
    restored.integrate(Some(2.0)).expect("restored");
    assert_eq!(restored.calculate_megno(), sim.calculate_megno());
}

#[test]
fn snapshot_keeps_box_and_integrator_options() {
    let mut sim = Simulation::with_integrator(&IntegratorSettings {
        kind: IntegratorKind::WhFast,
        whfast: gravsim::WhFastSettings {
            corrector: 7,
            safe_mode: false,
        },
        ..IntegratorSettings::default()
    });
    sim.configure_box(3.0, 2, 1, 1).expect("valid box");
    sim.state.set_ghost_boxes(1, 0, 0).expect("box configured");
    sim.state.boundary = Boundary::Periodic;
    sim.state.n_active = Some(1);
    sim.add(Particle::new(1.0, NVec3::zeros(), NVec3::zeros()));

    let bytes = snapshot_bytes(&mut sim);
    let restored = Simulation::load_snapshot(&bytes[..]).expect("load");
    assert_eq!(restored.state.geometry, sim.state.geometry);
    assert_eq!(restored.state.boundary, Boundary::Periodic);
    assert_eq!(restored.state.n_active, Some(1));
    assert_eq!(restored.integrator().settings(), sim.integrator().settings());
}

#[test]
fn snapshot_rejects_foreign_data() {
    let mut sim = binary(IntegratorKind::Leapfrog, 0.01);
    let bytes = snapshot_bytes(&mut sim);

    let mut wrong_version = bytes.clone();
    wrong_version[8] = wrong_version[8].wrapping_add(1);
    assert!(matches!(
        Simulation::load_snapshot(&wrong_version[..]),
        Err(SimError::Snapshot(_))
    ));

    let mut wrong_magic = bytes.clone();
    wrong_magic[0] = b'X';
    assert!(matches!(
        Simulation::load_snapshot(&wrong_magic[..]),
        Err(SimError::Snapshot(_))
    ));

    let empty: &[u8] = &[];
    assert!(matches!(Simulation::load_snapshot(empty), Err(SimError::Snapshot(_))));

    assert!(Simulation::load_snapshot(&bytes[..20]).is_err());
}

// ==================================================================================
// YAML scenarios
// ==================================================================================

const MINIMAL: &str = r#"
bodies:
  - x: [0.0, 0.0, 0.0]
    v: [0.0, 0.0, 0.0]
    m: 1.0
  - x: [1.0, 0.0, 0.0]
    v: [0.0, 1.0, 0.0]
    m: 1.0e-3
    radius: 0.01
    id: 7
"#;

#[test]
fn yaml_defaults() {
    let cfg = ScenarioConfig::from_yaml(MINIMAL).expect("valid YAML");
    assert_eq!(cfg.engine.integrator, IntegratorKind::Ias15);
    assert_eq!(cfg.engine.gravity, GravityMode::Direct);
    assert_eq!(cfg.engine.boundary, Boundary::None);
    assert_eq!(cfg.engine.theta, 0.5);
    assert_eq!(cfg.parameters.tmax(), None);
    assert_eq!(cfg.parameters.G, 1.0);
    assert!(cfg.parameters.exact_finish_time);
    assert_eq!(cfg.bodies[1].id, 7);
    assert_eq!(cfg.bodies[0].radius, 0.0);

    let scenario = Scenario::build(cfg).expect("valid scenario");
    assert_eq!(scenario.tmax, None);
    assert_eq!(scenario.simulation.particles().len(), 2);
    assert_eq!(scenario.simulation.state.opening_angle2, 0.25);
    assert_eq!(scenario.simulation.particles()[1].r, 0.01);
}

#[test]
fn yaml_engine_options() {
    let yaml = r#"
engine:
  integrator: "whfast"
  whfast:
    corrector: 5
  gravity: "tree"
  theta: 0.7
parameters:
  t_end: 10.0
  dt: 0.02
  n_active: 1
  megno_delta: 1.0e-6
"#
    .to_string()
        + MINIMAL;
    let cfg = ScenarioConfig::from_yaml(&yaml).expect("valid YAML");
    assert_eq!(cfg.engine.whfast.corrector, 5);
    assert!(cfg.engine.whfast.safe_mode);
    assert_eq!(cfg.parameters.tmax(), Some(10.0));

    let scenario = Scenario::build(cfg).expect("valid scenario");
    let sim = &scenario.simulation;
    assert_eq!(sim.integrator().kind(), IntegratorKind::WhFast);
    assert_eq!(sim.integrator().settings().whfast.corrector, 5);
    assert_eq!(sim.state.gravity, GravityMode::Tree);
    assert_relative_eq!(sim.state.opening_angle2, 0.49, max_relative = 1e-12);
    assert_eq!(sim.state.dt, 0.02);
    assert_eq!(sim.state.n_active, Some(1));
    assert_eq!(sim.state.particles.n_var(), 2);
}

#[test]
fn yaml_errors() {
    let no_bodies = "engine:\n  integrator: \"ias15\"\n";
    assert!(matches!(ScenarioConfig::from_yaml(no_bodies), Err(SimError::Yaml(_))));

    let unknown_integrator = "engine:\n  integrator: \"rk4\"\n".to_string() + MINIMAL;
    assert!(matches!(
        ScenarioConfig::from_yaml(&unknown_integrator),
        Err(SimError::Yaml(_))
    ));

    let boxless = "engine:\n  boundary: \"periodic\"\n".to_string() + MINIMAL;
    let cfg = ScenarioConfig::from_yaml(&boxless).expect("valid YAML");
    assert!(matches!(Scenario::build(cfg), Err(SimError::Config { .. })));

    let too_many_active = "parameters:\n  n_active: 3\n".to_string() + MINIMAL;
    let cfg = ScenarioConfig::from_yaml(&too_many_active).expect("valid YAML");
    assert!(matches!(Scenario::build(cfg), Err(SimError::Config { .. })));

    assert!(matches!(
        ScenarioConfig::from_path(scenario_dir().join("missing.yaml")),
        Err(SimError::Io(_))
    ));
}

#[test]
fn bundled_scenarios_build() {
    for name in [
        "two_body.yaml",
        "outer_planets.yaml",
        "close_encounter.yaml",
        "shearing_sheet.yaml",
    ] {
        let cfg = ScenarioConfig::from_path(scenario_dir().join(name))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        let n_bodies = cfg.bodies.len();
        let scenario = Scenario::build(cfg).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(scenario.simulation.particles().len(), n_bodies, "{name}");
        assert!(scenario.tmax.is_some(), "{name}");
    }
}

#[test]
fn two_body_scenario_closes_its_orbit() {
    let cfg = ScenarioConfig::from_path(scenario_dir().join("two_body.yaml")).expect("scenario");
    let start: Vec<NVec3> = cfg.bodies.iter().map(|b| NVec3::from(b.x)).collect();
    let mut scenario = Scenario::build(cfg).expect("valid scenario");

    let status = scenario.run().expect("integration");
    assert_eq!(status, IntegrationStatus::ReachedTmax);
    assert_eq!(Some(scenario.simulation.state.t), scenario.tmax);
    for (a, p) in start.iter().zip(scenario.simulation.particles()) {
        assert!((a - p.x).norm() < 1e-8, "{a:?} vs {:?}", p.x);
    }
}

// ==================================================================================
// Orbital elements
// ==================================================================================

fn star() -> Particle {
    Particle::new(1.0, NVec3::zeros(), NVec3::zeros())
}

/// Difference of two angles, in (-π, π]
fn angle_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    if d > PI {
        d - TAU
    } else {
        d
    }
}

#[test]
fn orbit_of_circular_prograde_planet() {
    let p = Particle::new(0.0, NVec3::new(0.0, 1.0, 0.0), NVec3::new(-1.0, 0.0, 0.0));
    let o = Orbit::from_particles(1.0, &p, &star()).expect("bound orbit");

    assert_relative_eq!(o.a, 1.0, max_relative = 1e-12);
    assert_abs_diff_eq!(o.e, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(o.inc, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(o.f, FRAC_PI_2, epsilon = 1e-12);
    assert_relative_eq!(o.period, TAU, max_relative = 1e-12);
    assert_relative_eq!(o.h, 1.0, max_relative = 1e-12);
}

#[test]
fn orbit_of_retrograde_planet() {
    let p = Particle::new(0.0, NVec3::new(0.0, 1.0, 0.0), NVec3::new(1.0, 0.0, 0.0));
    let o = Orbit::from_particles(1.0, &p, &star()).expect("bound orbit");

    assert_abs_diff_eq!(o.inc, PI, epsilon = 1e-12);
    assert_abs_diff_eq!(o.omega_node, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(o.f, 3.0 * FRAC_PI_2, epsilon = 1e-12);
}

#[test]
fn orbit_of_unbound_particle() {
    let p = Particle::new(0.0, NVec3::new(1.0, 0.0, 0.0), NVec3::new(0.0, 2.0, 0.0));
    let o = Orbit::from_particles(1.0, &p, &star()).expect("hyperbolic orbit");
    assert!(o.a < 0.0);
    assert!(o.e > 1.0);
    assert_eq!(o.period, f64::INFINITY);
    assert_abs_diff_eq!(o.f, 0.0, epsilon = 1e-12);
}

#[test]
fn orbit_elements_are_constant_along_the_orbit() {
    // inclined, eccentric, node away from the x axis
    let (inc, node) = (0.4_f64, 0.7_f64);
    let rotate = |v: NVec3| {
        let (si, ci) = inc.sin_cos();
        let (sn, cn) = node.sin_cos();
        let tilted = NVec3::new(v.x, ci * v.y - si * v.z, si * v.y + ci * v.z);
        NVec3::new(cn * tilted.x - sn * tilted.y, sn * tilted.x + cn * tilted.y, tilted.z)
    };
    let mut p = Particle::new(
        0.0,
        rotate(NVec3::new(0.8, 0.3, 0.0)),
        rotate(NVec3::new(-0.2, 1.1, 0.0)),
    );
    let o0 = Orbit::from_particles(1.0, &p, &star()).expect("bound orbit");
    assert_abs_diff_eq!(o0.inc, inc, epsilon = 1e-12);
    assert_abs_diff_eq!(o0.omega_node, node, epsilon = 1e-12);

    let n = TAU / o0.period;
    let dt = 0.37;
    kepler_drift(&mut p.x, &mut p.v, 1.0, dt);
    let o1 = Orbit::from_particles(1.0, &p, &star()).expect("bound orbit");

    assert_relative_eq!(o1.a, o0.a, max_relative = 1e-10);
    assert_abs_diff_eq!(o1.e, o0.e, epsilon = 1e-10);
    assert_abs_diff_eq!(o1.inc, o0.inc, epsilon = 1e-10);
    assert_abs_diff_eq!(angle_diff(o1.omega_node, o0.omega_node), 0.0, epsilon = 1e-10);
    assert_abs_diff_eq!(angle_diff(o1.omega, o0.omega), 0.0, epsilon = 1e-10);
    assert_abs_diff_eq!(angle_diff(o1.l, o0.l), n * dt, epsilon = 1e-9);
}

#[test]
fn orbit_is_undefined_for_degenerate_pairs() {
    let p = Particle::new(0.0, NVec3::new(1.0, 0.0, 0.0), NVec3::new(0.0, 1.0, 0.0));

    let massless = Particle::new(0.0, NVec3::zeros(), NVec3::zeros());
    assert!(matches!(Orbit::from_particles(1.0, &p, &massless), Err(SimError::Orbit(_))));

    let on_top = Particle::new(0.0, NVec3::zeros(), NVec3::new(0.0, 1.0, 0.0));
    assert!(matches!(Orbit::from_particles(1.0, &on_top, &star()), Err(SimError::Orbit(_))));

    let radial = Particle::new(0.0, NVec3::new(1.0, 0.0, 0.0), NVec3::new(0.5, 0.0, 0.0));
    assert!(matches!(Orbit::from_particles(1.0, &radial, &star()), Err(SimError::Orbit(_))));
}
