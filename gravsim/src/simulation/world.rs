//! Simulation state
//!
//! `SimState` is everything about a simulation except the active integrator
//! and the host hooks. Integrators and hooks receive it by `&mut`, so the
//! two can be borrowed independently while a step is in flight.

use crate::error::{SimError, SimResult};
use crate::simulation::barnes_hut::BarnesHutTree;
use crate::simulation::boundary::{Boundary, BoxGeometry, GhostBox};
use crate::simulation::collision::{Collision, CollisionMode};
use crate::simulation::forces::{
    potential_energy, Acceleration, CompensatedGravity, GravityMode, NewtonianGravity, TreeGravity,
    VariationalGravity,
};
use crate::simulation::hooks::Hooks;
use crate::simulation::megno::MegnoStats;
use crate::simulation::states::{NVec3, Particle, ParticleStore};

#[derive(Debug, Clone)]
pub struct SimState {
    pub t: f64,
    pub G: f64,
    pub softening: f64,
    pub dt: f64,
    pub dt_last_done: f64,
    pub exact_finish_time: bool,
    pub exit_simulation: bool, // checked once per step boundary
    pub force_is_velocity_dependent: bool,
    pub gravity_ignore_10: bool,
    pub opening_angle2: f64, // Barnes-Hut opening angle, squared

    pub gravity: GravityMode,
    pub collision: CollisionMode,
    pub boundary: Boundary,
    pub geometry: Option<BoxGeometry>,
    pub omega: f64,           // shearing-sheet / epicyclic frequency
    pub omega_z: Option<f64>, // vertical frequency, defaults to omega

    /// Particles `[0, n_active)` source gravity; `None` means all of them.
    pub n_active: Option<usize>,

    pub collisions_nlog: u64,
    pub collisions_plog: f64,
    pub max_radius: [f64; 2], // two largest radii, refreshed after collisions
    pub minimum_collision_velocity: f64,

    pub megno: MegnoStats,
    pub particles: ParticleStore,
    pub steps_done: u64,

    pub(crate) tree: Option<BarnesHutTree>,
    pub(crate) collisions: Vec<Collision>,
    pub(crate) accel_scratch: Vec<NVec3>,
    /// Bumped on every particle-count change; integrators compare it against
    /// the value their scratch was built for.
    pub(crate) layout_epoch: u64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            t: 0.0,
            G: 1.0,
            softening: 0.0,
            dt: 0.001,
            dt_last_done: 0.0,
            exact_finish_time: true,
            exit_simulation: false,
            force_is_velocity_dependent: false,
            gravity_ignore_10: false,
            opening_angle2: 0.25,
            gravity: GravityMode::Direct,
            collision: CollisionMode::None,
            boundary: Boundary::None,
            geometry: None,
            omega: 1.0,
            omega_z: None,
            n_active: None,
            collisions_nlog: 0,
            collisions_plog: 0.0,
            max_radius: [0.0; 2],
            minimum_collision_velocity: 0.0,
            megno: MegnoStats::default(),
            particles: ParticleStore::new(),
            steps_done: 0,
            tree: None,
            collisions: Vec::new(),
            accel_scratch: Vec::new(),
            layout_epoch: 0,
        }
    }
}

impl SimState {
    pub fn new() -> Self {
        Self::default()
    }

    // particle store ======================================================================

    /// Append a real particle (plus a zero shadow while MEGNO is active).
    pub fn add(&mut self, p: Particle) {
        self.note_radius(p.r);

        let shadow = Particle {
            m: p.m,
            id: p.id,
            ..Particle::default()
        };
        self.particles.push_real(p);
        if self.megno_active() {
            self.particles.push_variational(shadow);
        }
        self.count_changed();
    }

    /// Remove real particle `index`; `false` (and no change) if there is none.
    pub fn remove(&mut self, index: usize, keep_sorted: bool) -> bool {
        if !self.particles.remove(index, keep_sorted) {
            return false;
        }
        if let Some(n) = self.n_active {
            if index < n {
                self.n_active = Some(n - 1);
            }
        }
        self.count_changed();
        true
    }

    pub fn remove_by_id(&mut self, id: i64, keep_sorted: bool) -> bool {
        match self.particles.index_of_id(id) {
            Some(index) => self.remove(index, keep_sorted),
            None => false,
        }
    }

    /// Drop every particle (and every shadow), keeping the allocation.
    pub fn remove_all(&mut self) {
        self.particles.clear();
        self.megno = MegnoStats::default();
        self.n_active = None;
        self.max_radius = [0.0; 2];
        self.count_changed();
    }

    /// Recompute the two largest radii from the real particles.
    pub fn update_max_radius(&mut self) {
        self.max_radius = [0.0; 2];
        for i in 0..self.particles.n_real() {
            let r = self.particles.real()[i].r;
            self.note_radius(r);
        }
    }

    fn note_radius(&mut self, r: f64) {
        if r > self.max_radius[0] {
            self.max_radius[1] = self.max_radius[0];
            self.max_radius[0] = r;
        } else if r > self.max_radius[1] {
            self.max_radius[1] = r;
        }
    }

    pub fn n_real(&self) -> usize {
        self.particles.n_real()
    }

    pub fn n_active_count(&self) -> usize {
        let n = self.particles.n_real();
        self.n_active.map_or(n, |a| a.min(n))
    }

    fn count_changed(&mut self) {
        self.drop_tree();
        self.collisions.clear();
        self.layout_epoch += 1;
    }

    // box & boundaries ====================================================================

    /// Set the root grid: `nx * ny * nz` boxes of side `root_size`.
    pub fn configure_box(&mut self, root_size: f64, nx: usize, ny: usize, nz: usize) -> SimResult<()> {
        let mut geometry = BoxGeometry::new(root_size, nx, ny, nz)?;
        if let Some(old) = self.geometry {
            geometry.nghost = old.nghost;
        }
        self.geometry = Some(geometry);
        self.drop_tree();
        Ok(())
    }

    /// Number of ghost boxes per axis, on each side of the root grid.
    pub fn set_ghost_boxes(&mut self, nx: usize, ny: usize, nz: usize) -> SimResult<()> {
        match self.geometry.as_mut() {
            Some(g) => {
                g.nghost = [nx, ny, nz];
                Ok(())
            }
            None => Err(SimError::config("ghost boxes need a configured box")),
        }
    }

    pub fn ghost_box(&self, i: i32, j: i32, k: i32) -> GhostBox {
        self.boundary
            .ghost_box(self.geometry.as_ref(), self.omega, self.t, i, j, k)
    }

    /// Ghost boxes for the current boundary; `cap` limits the count per axis.
    pub fn ghost_boxes(&self, cap: Option<usize>) -> Vec<GhostBox> {
        self.boundary
            .ghost_boxes(self.geometry.as_ref(), self.omega, self.t, cap)
    }

    /// Root box holding real particle `index`
    pub fn rootbox_for_particle(&self, index: usize) -> Option<usize> {
        let g = self.geometry.as_ref()?;
        let p = self.particles.real().get(index)?;
        Some(g.rootbox_for_particle(&p.x))
    }

    /// Configuration checks done before stepping
    pub fn validate(&self) -> SimResult<()> {
        if self.boundary != Boundary::None && self.geometry.is_none() {
            return Err(SimError::config(format!(
                "boundary {:?} needs a configured box",
                self.boundary
            )));
        }
        if !self.dt.is_finite() || self.dt == 0.0 {
            return Err(SimError::config(format!("invalid timestep dt = {}", self.dt)));
        }
        if self.opening_angle2 < 0.0 {
            return Err(SimError::config("opening angle must not be negative"));
        }
        Ok(())
    }

    // tree =================================================================================

    /// Throw the tree away and clear every particle's leaf id.
    pub fn drop_tree(&mut self) {
        self.tree = None;
        self.particles.invalidate_cells();
    }

    pub fn tree(&self) -> Option<&BarnesHutTree> {
        self.tree.as_ref()
    }

    /// Build a fresh tree over the current positions.
    ///
    /// The root grid only applies when a boundary uses it. With
    /// `Boundary::None` the tree fits one cube around every particle, so a
    /// configured box never hides particles from gravity or collisions.
    pub fn rebuild_tree(&mut self) {
        let n_active = self.n_active_count();
        let geometry = match self.boundary {
            Boundary::None => None,
            _ => self.geometry.as_ref(),
        };
        self.tree = None;
        self.tree = Some(BarnesHutTree::build(self.particles.real_mut(), n_active, geometry));
    }

    // forces ===============================================================================

    /// Recompute every acceleration: gravity on the real particles, the
    /// linearized term on the shadows, then the additional-forces hook.
    pub fn update_acceleration(&mut self, hooks: &mut Hooks) {
        let n_real = self.particles.n_real();
        let n_active = self.n_active_count();
        let eps2 = self.softening * self.softening;

        for p in self.particles.as_mut_slice() {
            p.a = NVec3::zeros();
        }
        self.accel_scratch.clear();
        self.accel_scratch.resize(n_real, NVec3::zeros());

        match self.gravity {
            GravityMode::None => {}
            GravityMode::Direct => {
                let ghosts = self.ghost_boxes(None);
                NewtonianGravity {
                    G: self.G,
                    eps2,
                    n_active,
                    ignore_10: self.gravity_ignore_10,
                    ghosts: &ghosts,
                }
                .accumulate(self.particles.real(), &mut self.accel_scratch);
            }
            GravityMode::Compensated => {
                let ghosts = self.ghost_boxes(None);
                CompensatedGravity {
                    G: self.G,
                    eps2,
                    n_active,
                    ignore_10: self.gravity_ignore_10,
                    ghosts: &ghosts,
                }
                .accumulate(self.particles.real(), &mut self.accel_scratch);
            }
            GravityMode::Tree => {
                let ghosts = self.ghost_boxes(None);
                self.rebuild_tree();
                if let Some(tree) = self.tree.as_ref() {
                    TreeGravity {
                        G: self.G,
                        eps2,
                        opening_angle2: self.opening_angle2,
                        ignore_10: self.gravity_ignore_10,
                        ghosts: &ghosts,
                        tree,
                    }
                    .accumulate(self.particles.real(), &mut self.accel_scratch);
                }
            }
        }

        for (p, a) in self.particles.real_mut().iter_mut().zip(self.accel_scratch.iter()) {
            p.a = *a;
        }

        self.update_variational_acceleration();

        if let Some(forces) = hooks.additional_forces.as_mut() {
            forces.apply(self.t, self.particles.real_mut());
        }
    }

    /// Linearized accelerations of the shadows from the current real
    /// positions. Zero without gravity.
    pub(crate) fn update_variational_acceleration(&mut self) {
        let n_var = self.particles.n_var();
        if n_var == 0 {
            return;
        }
        let n_real = self.particles.n_real();
        self.accel_scratch.clear();
        self.accel_scratch.resize(n_var, NVec3::zeros());
        if self.gravity != GravityMode::None {
            VariationalGravity {
                G: self.G,
                eps2: self.softening * self.softening,
                n_active: self.n_active_count(),
            }
            .accumulate(self.particles.as_slice(), n_real, &mut self.accel_scratch);
        }

        let shadows = &mut self.particles.as_mut_slice()[n_real..];
        for (p, a) in shadows.iter_mut().zip(self.accel_scratch.iter()) {
            p.a = *a;
        }
    }

    // diagnostics ==========================================================================

    /// Kinetic plus (softened) potential energy of the real particles.
    pub fn total_energy(&self) -> f64 {
        let real = self.particles.real();
        let kinetic: f64 = real.iter().map(Particle::kinetic_energy).sum();
        let eps2 = self.softening * self.softening;
        kinetic + potential_energy(real, self.n_active_count(), self.G, eps2)
    }

    /// Mass-weighted centre of the real particles (mass, position, velocity)
    pub fn center_of_mass(&self) -> Particle {
        let mut com = Particle::default();
        for p in self.particles.real() {
            com = crate::simulation::orbit::com_of_pair(&com, p);
        }
        com
    }

    /// Shift every real particle into the centre-of-mass frame.
    pub fn move_to_com(&mut self) {
        let com = self.center_of_mass();
        for p in self.particles.real_mut() {
            p.x -= com.x;
            p.v -= com.v;
        }
    }
}
