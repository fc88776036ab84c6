use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gravsim::simulation::boundary::{boundary_check, Boundary};
use gravsim::simulation::collision::{self, CollisionMode, CollisionOutcome};
use gravsim::simulation::forces::GravityMode;
use gravsim::simulation::hooks::Hooks;
use gravsim::simulation::integrator::{IntegratorKind, IntegratorSettings};
use gravsim::{Collision, IntegrationStatus, NVec3, Particle, SimError, SimState, Simulation};

/// Two bodies separated along the x-axis, at rest
pub fn two_body_state(dist: f64, m1: f64, m2: f64) -> SimState {
    let mut state = SimState::new();
    state.G = 0.1;
    state.add(Particle::new(m1, NVec3::new(-dist / 2.0, 0.0, 0.0), NVec3::zeros()).with_id(1));
    state.add(Particle::new(m2, NVec3::new(dist / 2.0, 0.0, 0.0), NVec3::zeros()).with_id(2));
    state
}

/// Seeded cloud of `n` bodies in a cube of side 10 around the origin
pub fn random_cloud(n: usize, seed: u64) -> SimState {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = SimState::new();
    for i in 0..n {
        let x = NVec3::new(
            rng.gen_range(-5.0..5.0),
            rng.gen_range(-5.0..5.0),
            rng.gen_range(-5.0..5.0),
        );
        state.add(Particle::new(rng.gen_range(0.5..1.5), x, NVec3::zeros()).with_id(i as i64));
    }
    state
}

pub fn accelerations(state: &mut SimState) -> Vec<NVec3> {
    state.update_acceleration(&mut Hooks::default());
    state.particles.real().iter().map(|p| p.a).collect()
}

fn ids(state: &SimState) -> Vec<i64> {
    state.particles.real().iter().map(|p| p.id).collect()
}

fn free_simulation(kind: IntegratorKind) -> Simulation {
    let mut sim = Simulation::with_integrator(&IntegratorSettings {
        kind,
        ..IntegratorSettings::default()
    });
    sim.state.gravity = GravityMode::None;
    sim.state.dt = 0.01;
    sim
}

// ==================================================================================
// Particle store tests
// ==================================================================================

fn four_particles() -> SimState {
    let mut state = SimState::new();
    for id in 0..4 {
        state.add(Particle::new(1.0, NVec3::new(id as f64, 0.0, 0.0), NVec3::zeros()).with_id(id));
    }
    state
}

#[test]
fn store_unsorted_removal_moves_last_into_hole() {
    let mut state = four_particles();
    assert!(state.remove(1, false));
    assert_eq!(ids(&state), vec![0, 3, 2]);
}

#[test]
fn store_sorted_removal_keeps_order() {
    let mut state = four_particles();
    assert!(state.remove(1, true));
    assert_eq!(ids(&state), vec![0, 2, 3]);
    assert!(state.remove_by_id(3, true));
    assert_eq!(ids(&state), vec![0, 2]);
}

#[test]
fn store_rejects_invalid_removals() {
    let mut state = four_particles();
    assert!(!state.remove(4, false));
    assert!(!state.remove_by_id(42, true));
    assert_eq!(state.n_real(), 4);

    // shadow indices are not removable either
    state.megno_init(1e-6, 1);
    assert_eq!(state.particles.len(), 8);
    assert!(!state.remove(5, true));
    assert_eq!(state.particles.len(), 8);
}

#[test]
fn store_removal_keeps_shadows_paired() {
    for keep_sorted in [false, true] {
        let mut state = four_particles();
        state.megno_init(1e-6, 3);
        assert!(state.remove(1, keep_sorted));

        assert_eq!(state.particles.n_real(), 3);
        assert_eq!(state.particles.n_var(), 3);
        let real: Vec<i64> = state.particles.real().iter().map(|p| p.id).collect();
        let shadows: Vec<i64> = state.particles.variational().iter().map(|p| p.id).collect();
        assert_eq!(real, shadows);
    }
}

#[test]
fn store_add_during_megno_appends_shadow() {
    let mut state = four_particles();
    state.megno_init(1e-6, 3);
    state.add(Particle::new(1.0, NVec3::new(9.0, 0.0, 0.0), NVec3::zeros()).with_id(9));

    assert_eq!(state.particles.n_real(), 5);
    assert_eq!(state.particles.n_var(), 5);
    assert_eq!(state.particles.real()[4].id, 9);
    assert_eq!(state.particles.variational()[4].id, 9);
}

#[test]
fn store_remove_all_keeps_capacity() {
    let mut state = four_particles();
    state.megno_init(1e-6, 3);
    let capacity = state.particles.capacity();
    state.remove_all();

    assert!(state.particles.is_empty());
    assert_eq!(state.particles.n_var(), 0);
    assert_eq!(state.particles.capacity(), capacity);
    assert!(capacity >= 128);
}

#[test]
fn store_removal_updates_active_count() {
    let mut state = four_particles();
    state.n_active = Some(2);
    assert!(state.remove(0, true));
    assert_eq!(state.n_active, Some(1));
    assert!(state.remove(2, true));
    assert_eq!(state.n_active, Some(1));
}

#[test]
fn store_tracks_two_largest_radii() {
    let mut state = SimState::new();
    for r in [0.1, 0.5, 0.3, 0.2] {
        state.add(Particle::new(1.0, NVec3::zeros(), NVec3::zeros()).with_radius(r));
    }
    assert_eq!(state.max_radius, [0.5, 0.3]);
}

// ==================================================================================
// Gravity tests
// ==================================================================================

#[test]
fn gravity_newton_third_law() {
    let mut state = two_body_state(1.0, 2.0, 3.0);
    let acc = accelerations(&mut state);
    let net = acc[0] * 2.0 + acc[1] * 3.0;
    assert!(net.norm() < 1e-12, "Net momentum not zero: {:?}", net);
}

#[test]
fn gravity_inverse_square_law() {
    let mut near = two_body_state(1.0, 1.0, 1.0);
    let mut far = two_body_state(2.0, 1.0, 1.0);
    let ratio = accelerations(&mut near)[0].norm() / accelerations(&mut far)[0].norm();
    assert_abs_diff_eq!(ratio, 4.0, epsilon = 1e-12);
}

#[test]
fn gravity_softening_prevents_blowup() {
    let mut state = two_body_state(1e-9, 1.0, 1.0);
    state.softening = 0.3;
    let acc = accelerations(&mut state);
    assert!(acc[0].norm() < 1e-6, "Softening failed; acceleration too large");
}

#[test]
fn gravity_test_particles_feel_but_do_not_source() {
    let mut state = two_body_state(1.0, 1.0, 1.0);
    state.add(Particle::new(5.0, NVec3::new(0.0, 1.0, 0.0), NVec3::zeros()));
    state.n_active = Some(2);
    let acc = accelerations(&mut state);

    // the test particle pulls nobody, but is pulled by both actives
    let mut pair = two_body_state(1.0, 1.0, 1.0);
    let pair_acc = accelerations(&mut pair);
    assert_eq!(acc[0], pair_acc[0]);
    assert_eq!(acc[1], pair_acc[1]);
    assert!(acc[2].y < 0.0);
}

#[test]
fn gravity_ignore_10_skips_first_pair_only() {
    let mut state = two_body_state(1.0, 1.0, 1.0);
    state.add(Particle::new(1.0, NVec3::new(0.0, 2.0, 0.0), NVec3::zeros()));
    state.gravity_ignore_10 = true;
    let acc = accelerations(&mut state);

    // particles 0 and 1 only see particle 2, which sits symmetrically above them
    assert_abs_diff_eq!(acc[0].x, -acc[1].x, epsilon = 1e-15);
    assert!(acc[0].x > 0.0 && acc[0].y > 0.0);
    assert!(acc[2].y < 0.0);
}

#[test]
fn gravity_none_leaves_accelerations_zero() {
    let mut state = random_cloud(20, 5);
    state.gravity = GravityMode::None;
    assert!(accelerations(&mut state).iter().all(|a| *a == NVec3::zeros()));
}

#[test]
fn gravity_compensated_agrees_with_direct() {
    let mut direct = random_cloud(300, 11);
    let mut compensated = direct.clone();
    compensated.gravity = GravityMode::Compensated;

    let a = accelerations(&mut direct);
    let b = accelerations(&mut compensated);
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).norm() <= 1e-10 * x.norm(), "{x:?} vs {y:?}");
    }
}

#[test]
fn gravity_is_identical_for_any_thread_count() {
    for mode in [GravityMode::Direct, GravityMode::Compensated, GravityMode::Tree] {
        let run = |threads: usize| {
            let mut state = random_cloud(400, 17);
            state.gravity = mode;
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .expect("thread pool")
                .install(|| accelerations(&mut state))
        };
        assert_eq!(run(1), run(4), "{mode:?} differs between thread counts");
    }
}

// ==================================================================================
// Barnes-Hut tests
// ==================================================================================

fn relative_rms_error(exact: &[NVec3], approx: &[NVec3]) -> f64 {
    let num: f64 = exact.iter().zip(approx).map(|(e, a)| (e - a).norm_squared()).sum();
    let den: f64 = exact.iter().map(|e| e.norm_squared()).sum();
    (num / den).sqrt()
}

fn tree_accelerations(state: &SimState, theta: f64) -> Vec<NVec3> {
    let mut state = state.clone();
    state.gravity = GravityMode::Tree;
    state.opening_angle2 = theta * theta;
    accelerations(&mut state)
}

#[test]
fn tree_zero_opening_angle_is_exact() {
    let mut direct = random_cloud(200, 23);
    let exact = accelerations(&mut direct);
    let tree = tree_accelerations(&direct, 0.0);
    assert!(relative_rms_error(&exact, &tree) < 1e-12);
}

#[test]
fn tree_error_shrinks_with_opening_angle() {
    let mut direct = random_cloud(500, 29);
    let exact = accelerations(&mut direct);

    let coarse = relative_rms_error(&exact, &tree_accelerations(&direct, 0.8));
    let fine = relative_rms_error(&exact, &tree_accelerations(&direct, 0.3));
    assert!(fine < coarse, "theta 0.3 error {fine} not below theta 0.8 error {coarse}");
    assert!(coarse < 0.1, "theta 0.8 error too large: {coarse}");
    assert!(fine > 0.0);
}

#[test]
fn tree_points_particles_at_their_leaves() {
    let mut state = random_cloud(100, 31);
    state.rebuild_tree();
    let tree = state.tree().expect("tree built");

    assert_abs_diff_eq!(
        tree.total_mass(),
        state.particles.real().iter().map(|p| p.m).sum::<f64>(),
        epsilon = 1e-12
    );
    for (i, p) in state.particles.real().iter().enumerate() {
        let leaf = p.cell.expect("every particle is in the tree");
        assert!(tree.leaf_bodies(leaf).any(|b| b == i));
    }

    // adding a particle drops the tree and every leaf id
    state.add(Particle::new(1.0, NVec3::zeros(), NVec3::zeros()));
    assert!(state.tree().is_none());
    assert!(state.particles.real().iter().all(|p| p.cell.is_none()));
}

#[test]
fn tree_handles_coincident_particles() {
    let mut state = SimState::new();
    for _ in 0..3 {
        state.add(Particle::new(1.0, NVec3::new(1.0, 1.0, 1.0), NVec3::zeros()));
    }
    state.add(Particle::new(1.0, NVec3::new(-1.0, 0.0, 0.0), NVec3::zeros()));
    state.softening = 0.1;
    state.opening_angle2 = 0.0;

    let mut direct = state.clone();
    let exact = accelerations(&mut direct);
    state.gravity = GravityMode::Tree;
    let tree = accelerations(&mut state);
    assert!(relative_rms_error(&exact, &tree) < 1e-12);
}

#[test]
fn tree_skips_the_central_pair_when_asked() {
    let mut cloud = random_cloud(50, 43);
    cloud.gravity_ignore_10 = true;
    let exact = accelerations(&mut cloud.clone());
    let tree = tree_accelerations(&cloud, 0.0);
    assert!(relative_rms_error(&exact, &tree) < 1e-12);

    // star, planet and a third body; the planet must only feel the third
    let mut trio = SimState::new();
    trio.G = 1.0;
    trio.add(Particle::new(1.0, NVec3::zeros(), NVec3::zeros()));
    trio.add(Particle::new(1e-3, NVec3::new(1.0, 0.0, 0.0), NVec3::zeros()));
    trio.add(Particle::new(1e-3, NVec3::new(0.0, 3.0, 0.0), NVec3::zeros()));
    trio.gravity_ignore_10 = true;
    let exact = accelerations(&mut trio.clone());
    assert!(exact[1].x.abs() < 1e-4);

    // cells holding the partner are opened at any angle
    for theta in [0.0, 0.5, 1.0] {
        let tree = tree_accelerations(&trio, theta);
        for (t, d) in tree.iter().zip(&exact) {
            assert!((t - d).norm() <= 1e-12 * d.norm(), "theta {theta}: {t:?} vs {d:?}");
        }
    }
}

#[test]
fn tree_ignores_the_box_without_a_boundary() {
    // the cloud is much larger than the configured box
    let mut state = random_cloud(40, 47);
    state.configure_box(2.0, 1, 1, 1).expect("valid box");

    let exact = accelerations(&mut state.clone());
    let tree = tree_accelerations(&state, 0.0);
    assert!(relative_rms_error(&exact, &tree) < 1e-12);

    state.rebuild_tree();
    assert_eq!(state.tree().expect("tree built").skipped, 0);
}

#[test]
fn particle_on_an_upper_face_stays_in_the_last_root_box() {
    let mut state = SimState::new();
    state.configure_box(1.0, 2, 1, 1).expect("valid box");
    state.boundary = Boundary::Periodic;
    state.add(Particle::new(1.0, NVec3::new(1.0, 0.0, 0.0), NVec3::zeros()));
    state.add(Particle::new(1.0, NVec3::new(-0.5, 0.25, 0.0), NVec3::zeros()));

    assert_eq!(state.rootbox_for_particle(0), Some(1));
    assert_eq!(state.rootbox_for_particle(1), Some(0));

    state.rebuild_tree();
    let tree = state.tree().expect("tree built");
    let root = tree.roots[1].expect("box 1 is occupied");
    assert!(tree.node(root).bounds(&state.particles.real()[0].x));
    for p in state.particles.real() {
        let leaf = p.cell.expect("inside the box");
        assert!(tree.node(leaf).bounds(&p.x));
    }
}

// ==================================================================================
// Boundary & ghost box tests
// ==================================================================================

#[test]
fn box_configuration_is_validated() {
    let mut state = SimState::new();
    assert!(matches!(state.configure_box(0.0, 1, 1, 1), Err(SimError::Config { .. })));
    assert!(matches!(state.configure_box(1.0, 1, 0, 1), Err(SimError::Config { .. })));
    assert!(matches!(state.set_ghost_boxes(1, 1, 1), Err(SimError::Config { .. })));
    assert!(state.configure_box(2.0, 2, 1, 1).is_ok());
    assert_eq!(state.geometry.map(|g| g.boxsize), Some(NVec3::new(4.0, 2.0, 2.0)));
}

#[test]
fn rootbox_index_follows_grid_layout() {
    let mut state = SimState::new();
    state.configure_box(1.0, 2, 3, 2).expect("valid box");
    state.add(Particle::new(1.0, NVec3::new(-0.5, -1.2, -0.5), NVec3::zeros()));
    state.add(Particle::new(1.0, NVec3::new(0.5, 0.2, 0.5), NVec3::zeros()));
    state.add(Particle::new(1.0, NVec3::new(0.5, 1.2, -0.5), NVec3::zeros()));

    // (k * ny + j) * nx + i
    assert_eq!(state.rootbox_for_particle(0), Some(0));
    assert_eq!(state.rootbox_for_particle(1), Some((1 * 3 + 1) * 2 + 1));
    assert_eq!(state.rootbox_for_particle(2), Some((0 * 3 + 2) * 2 + 1));
    assert_eq!(state.rootbox_for_particle(3), None);
}

#[test]
fn ghost_boxes_follow_boundary() {
    let mut state = SimState::new();
    state.configure_box(2.0, 1, 1, 1).expect("valid box");
    state.set_ghost_boxes(1, 2, 0).expect("box configured");

    state.boundary = Boundary::Open;
    assert_eq!(state.ghost_boxes(None).len(), 1);

    state.boundary = Boundary::Periodic;
    assert_eq!(state.ghost_boxes(None).len(), 3 * 5);
    assert_eq!(state.ghost_boxes(Some(1)).len(), 3 * 3);
    let gb = state.ghost_box(1, 0, -1);
    assert_eq!(gb.position, NVec3::new(2.0, 0.0, -2.0));
    assert_eq!(gb.velocity, NVec3::zeros());

    state.boundary = Boundary::Shear;
    state.omega = 1.0;
    let gb = state.ghost_box(1, 0, 0);
    assert_eq!(gb.position, NVec3::new(2.0, 0.0, 0.0));
    assert_eq!(gb.velocity, NVec3::new(0.0, -3.0, 0.0));
}

#[test]
fn periodic_gravity_conserves_momentum() {
    let mut state = random_cloud(30, 37);
    state.configure_box(10.0, 1, 1, 1).expect("valid box");
    state.set_ghost_boxes(1, 1, 1).expect("box configured");
    state.boundary = Boundary::Periodic;

    let acc = accelerations(&mut state);
    let net: NVec3 = state
        .particles
        .real()
        .iter()
        .zip(&acc)
        .map(|(p, a)| p.m * a)
        .sum();
    let scale: f64 = state.particles.real().iter().zip(&acc).map(|(p, a)| p.m * a.norm()).sum();
    assert!(net.norm() < 1e-12 * scale, "net force {net:?}");
}

#[test]
fn periodic_gravity_is_translation_invariant() {
    let mut state = random_cloud(30, 41);
    state.configure_box(10.0, 1, 1, 1).expect("valid box");
    state.set_ghost_boxes(1, 1, 1).expect("box configured");
    state.boundary = Boundary::Periodic;

    let mut shifted = state.clone();
    for p in shifted.particles.real_mut() {
        p.x += NVec3::new(0.25, -0.5, 0.125);
    }

    let a = accelerations(&mut state);
    let b = accelerations(&mut shifted);
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).norm() <= 1e-9 * x.norm().max(1e-12));
    }
}

#[test]
fn periodic_boundary_wraps_particles() {
    let mut state = SimState::new();
    state.configure_box(2.0, 1, 1, 1).expect("valid box");
    state.boundary = Boundary::Periodic;
    state.add(Particle::new(1.0, NVec3::new(1.4, -1.1, 0.2), NVec3::zeros()));

    let outcome = boundary_check(&mut state);
    assert_eq!(outcome.wrapped, 1);
    let x = state.particles.real()[0].x;
    assert_abs_diff_eq!(x.x, -0.6, epsilon = 1e-12);
    assert_abs_diff_eq!(x.y, 0.9, epsilon = 1e-12);
    assert_abs_diff_eq!(x.z, 0.2, epsilon = 1e-12);
}

#[test]
fn shear_boundary_wraps_with_the_sheared_offset() {
    let mut state = SimState::new();
    state.configure_box(2.0, 1, 1, 1).expect("valid box");
    state.boundary = Boundary::Shear;
    state.omega = 1.0;
    state.t = 0.1;
    // both move with the local shear flow vy = -1.5 x
    state.add(Particle::new(1.0, NVec3::new(1.2, 0.3, 0.0), NVec3::new(0.0, -1.8, 0.0)));
    state.add(Particle::new(1.0, NVec3::new(-1.2, 0.3, 0.0), NVec3::new(0.0, 1.8, 0.0)));

    // at t = 0.1 the outer neighbour sits 0.3 lower in y and 3 slower
    let gb = state.ghost_box(1, 0, 0);
    assert_abs_diff_eq!(gb.position.y, -0.3, epsilon = 1e-12);
    assert_eq!(gb.velocity.y, -3.0);

    let outcome = boundary_check(&mut state);
    assert_eq!(outcome.wrapped, 2);
    let p = state.particles.real();
    assert_abs_diff_eq!(p[0].x.x, -0.8, epsilon = 1e-12);
    assert_abs_diff_eq!(p[0].x.y, 0.6, epsilon = 1e-12);
    assert_abs_diff_eq!(p[0].v.y, 1.2, epsilon = 1e-12);
    assert_abs_diff_eq!(p[1].x.x, 0.8, epsilon = 1e-12);
    assert_abs_diff_eq!(p[1].x.y, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(p[1].v.y, -1.2, epsilon = 1e-12);
}

#[test]
fn periodic_particle_reenters_on_the_other_side() {
    let mut sim = free_simulation(IntegratorKind::Leapfrog);
    sim.configure_box(2.0, 1, 1, 1).expect("valid box");
    sim.state.boundary = Boundary::Periodic;
    sim.add(Particle::new(1.0, NVec3::new(0.9, 0.0, 0.0), NVec3::new(1.0, 0.0, 0.0)));

    sim.integrate(Some(0.5)).expect("integration");
    assert_abs_diff_eq!(sim.particles()[0].x.x, -0.6, epsilon = 1e-9);
}

#[test]
fn open_boundary_removes_escapers() {
    let mut sim = free_simulation(IntegratorKind::Leapfrog);
    sim.configure_box(2.0, 1, 1, 1).expect("valid box");
    sim.state.boundary = Boundary::Open;
    sim.add(Particle::new(1.0, NVec3::zeros(), NVec3::zeros()).with_id(1));
    sim.add(Particle::new(1.0, NVec3::new(0.9, 0.0, 0.0), NVec3::new(1.0, 0.0, 0.0)).with_id(2));

    let status = sim.integrate(Some(0.5)).expect("integration");
    assert_eq!(status, IntegrationStatus::ReachedTmax);
    assert_eq!(sim.particles().len(), 1);
    assert_eq!(sim.particles()[0].id, 1);
}

#[test]
fn boundary_without_box_is_a_config_error() {
    let mut sim = free_simulation(IntegratorKind::Leapfrog);
    sim.state.boundary = Boundary::Periodic;
    sim.add(Particle::new(1.0, NVec3::zeros(), NVec3::zeros()));
    assert!(matches!(sim.step(), Err(SimError::Config { .. })));
}

// ==================================================================================
// Collision tests
// ==================================================================================

fn head_on(mode: CollisionMode) -> Simulation {
    let mut sim = free_simulation(IntegratorKind::Leapfrog);
    sim.state.dt = 0.001;
    sim.state.collision = mode;
    sim.add(Particle::new(1.0, NVec3::new(-0.075, 0.0, 0.0), NVec3::new(1.0, 0.0, 0.0)).with_radius(0.1));
    sim.add(Particle::new(1.0, NVec3::new(0.075, 0.0, 0.0), NVec3::new(-1.0, 0.0, 0.0)).with_radius(0.1));
    sim
}

#[test]
fn collision_search_direct_and_tree_agree() {
    let mut sim = head_on(CollisionMode::Tree);
    let ghosts = sim.state.ghost_boxes(Some(1));

    let mut direct = Vec::new();
    collision::search_direct(sim.state.particles.real(), &ghosts, None, &mut direct);

    sim.state.rebuild_tree();
    let tree = sim.state.tree().expect("tree built");
    let mut via_tree = Vec::new();
    collision::search_tree(
        sim.state.particles.real(),
        tree,
        &ghosts,
        sim.state.max_radius,
        &mut via_tree,
    );

    let pairs = |found: &[Collision]| found.iter().map(|c| (c.p1, c.p2)).collect::<Vec<_>>();
    assert_eq!(pairs(&direct), vec![(0, 1)]);
    assert_eq!(pairs(&via_tree), vec![(0, 1)]);
}

#[test]
fn collision_needs_overlap() {
    for mode in [CollisionMode::Direct, CollisionMode::Tree] {
        let mut sim = free_simulation(IntegratorKind::Leapfrog);
        sim.state.dt = 0.001;
        sim.state.collision = mode;
        // closing, but 0.3 apart with radii 0.1
        sim.add(Particle::new(1.0, NVec3::new(-0.15, 0.0, 0.0), NVec3::new(1.0, 0.0, 0.0)).with_radius(0.1));
        sim.add(Particle::new(1.0, NVec3::new(0.15, 0.0, 0.0), NVec3::new(-1.0, 0.0, 0.0)).with_radius(0.1));
        sim.step().expect("step");

        assert_eq!(sim.state.collisions_nlog, 0, "{mode:?}");
        assert_eq!(sim.particles()[0].v.x, 1.0);
        assert_eq!(sim.particles()[1].v.x, -1.0);
    }
}

// two particles touching through the x faces of a periodic box
fn across_periodic_edge(mode: CollisionMode) -> Simulation {
    let mut sim = free_simulation(IntegratorKind::Leapfrog);
    sim.state.dt = 0.001;
    sim.state.collision = mode;
    sim.configure_box(2.0, 1, 1, 1).expect("valid box");
    sim.state.set_ghost_boxes(1, 0, 0).expect("box configured");
    sim.state.boundary = Boundary::Periodic;
    sim.add(Particle::new(1.0, NVec3::new(-0.95, 0.0, 0.0), NVec3::new(-1.0, 0.0, 0.0)).with_radius(0.1));
    sim.add(Particle::new(1.0, NVec3::new(0.95, 0.0, 0.0), NVec3::new(1.0, 0.0, 0.0)).with_radius(0.1));
    sim
}

#[test]
fn collision_search_sees_periodic_images() {
    let mut sim = across_periodic_edge(CollisionMode::Tree);
    let ghosts = sim.state.ghost_boxes(Some(1));

    let mut direct = Vec::new();
    collision::search_direct(
        sim.state.particles.real(),
        &ghosts,
        sim.state.geometry.as_ref(),
        &mut direct,
    );

    sim.state.rebuild_tree();
    let tree = sim.state.tree().expect("tree built");
    let mut via_tree = Vec::new();
    collision::search_tree(
        sim.state.particles.real(),
        tree,
        &ghosts,
        sim.state.max_radius,
        &mut via_tree,
    );

    for found in [&direct, &via_tree] {
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].p1, found[0].p2), (0, 1));
        assert_eq!(found[0].gb.position, NVec3::new(2.0, 0.0, 0.0));
    }
}

#[test]
fn periodic_image_collision_bounces() {
    for mode in [CollisionMode::Direct, CollisionMode::Tree] {
        let mut sim = across_periodic_edge(mode);
        sim.step().expect("step");

        assert_eq!(sim.state.collisions_nlog, 1, "{mode:?}");
        let p = sim.particles();
        assert_abs_diff_eq!(p[0].v.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1].v.x, -1.0, epsilon = 1e-12);
    }
}

#[test]
fn collision_ignores_separating_pairs() {
    let mut sim = head_on(CollisionMode::Direct);
    for p in sim.particles_mut() {
        p.v = -p.v;
    }
    sim.step().expect("step");
    assert_eq!(sim.state.collisions_nlog, 0);
}

#[test]
fn hard_sphere_collision_swaps_velocities() {
    for mode in [CollisionMode::Direct, CollisionMode::Tree] {
        let mut sim = head_on(mode);
        sim.integrate(Some(0.01)).expect("integration");

        assert_eq!(sim.state.collisions_nlog, 1, "{mode:?}");
        let p = sim.particles();
        assert_abs_diff_eq!(p[0].v.x, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1].v.x, 1.0, epsilon = 1e-12);
        let momentum = p[0].m * p[0].v + p[1].m * p[1].v;
        assert!(momentum.norm() < 1e-12);
    }
}

#[test]
fn restitution_hook_damps_the_bounce() {
    let mut sim = head_on(CollisionMode::Direct);
    sim.hooks.restitution = Some(Box::new(|_speed: f64| 0.5));
    sim.step().expect("step");

    // relative speed 2 comes back as 1
    let p = sim.particles();
    assert_abs_diff_eq!(p[1].v.x - p[0].v.x, 1.0, epsilon = 1e-12);
}

#[test]
fn collision_resolver_can_remove_particles() {
    let mut sim = head_on(CollisionMode::Direct);
    sim.hooks.collision_resolver = Some(Box::new(
        |_t: f64, particles: &mut [Particle], c: &Collision| {
            // merge into the first particle
            let (a, b) = (particles[c.p1], particles[c.p2]);
            let m = a.m + b.m;
            particles[c.p1].v = (a.m * a.v + b.m * b.v) / m;
            particles[c.p1].m = m;
            CollisionOutcome::RemoveSecond
        },
    ));
    sim.step().expect("step");

    assert_eq!(sim.particles().len(), 1);
    assert_eq!(sim.particles()[0].m, 2.0);
    assert_eq!(sim.state.collisions_nlog, 1);
}

#[test]
fn resolver_radius_changes_refresh_max_radius() {
    let mut sim = head_on(CollisionMode::Tree);
    sim.hooks.collision_resolver = Some(Box::new(
        |_t: f64, particles: &mut [Particle], c: &Collision| {
            particles[c.p1].r = 0.5;
            CollisionOutcome::Keep
        },
    ));
    sim.step().expect("step");

    assert_eq!(sim.state.collisions_nlog, 1);
    assert_eq!(sim.state.max_radius, [0.5, 0.1]);
}
