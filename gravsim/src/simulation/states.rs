//! Core state types for the N-body simulation.
//!
//! - `Particle`: one point mass (or variational shadow) in 3D
//! - `ParticleStore`: the growable particle buffer, real particles first,
//!   followed by the block of variational shadows (paired by offset)

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::simulation::barnes_hut::NodeId;

pub type NVec3 = Vector3<f64>;

/// Capacity reserved by the first `add`
const INITIAL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub x: NVec3, // position
    pub v: NVec3, // velocity
    #[serde(skip)]
    pub a: NVec3, // acceleration, recomputed every force evaluation
    pub m: f64, // mass
    pub r: f64, // radius (collisions)
    pub last_collision: f64, // time of the last resolved collision
    pub id: i64,
    /// Leaf holding this particle in the current tree. Stale after teardown
    /// or any particle-count change; the store clears it in both cases.
    #[serde(skip)]
    pub cell: Option<NodeId>,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            x: NVec3::zeros(),
            v: NVec3::zeros(),
            a: NVec3::zeros(),
            m: 0.0,
            r: 0.0,
            last_collision: f64::NEG_INFINITY,
            id: 0,
            cell: None,
        }
    }
}

impl Particle {
    pub fn new(m: f64, x: NVec3, v: NVec3) -> Self {
        Self {
            x,
            v,
            m,
            ..Self::default()
        }
    }

    pub fn with_radius(mut self, r: f64) -> Self {
        self.r = r;
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.m * self.v.norm_squared()
    }
}

/// Owned particle buffer with explicit length / capacity.
///
/// Layout: `[0, n_real)` are real particles, `[n_real, len)` are variational
/// shadows. When shadows exist, shadow `n_real + i` belongs to real particle
/// `i`, and every operation keeps that pairing intact.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    particles: Vec<Particle>,
    n_var: usize,
}

impl ParticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a saved buffer whose last `n_var` entries are
    /// shadows. Returns `None` if `n_var` is larger than the buffer.
    pub(crate) fn from_parts(particles: Vec<Particle>, n_var: usize) -> Option<Self> {
        if n_var > particles.len() {
            return None;
        }
        let mut store = Self { particles, n_var };
        store.invalidate_cells();
        Some(store)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.particles.capacity()
    }

    pub fn n_real(&self) -> usize {
        self.particles.len() - self.n_var
    }

    pub fn n_var(&self) -> usize {
        self.n_var
    }

    pub fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    pub fn as_mut_slice(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn real(&self) -> &[Particle] {
        &self.particles[..self.n_real()]
    }

    pub fn real_mut(&mut self) -> &mut [Particle] {
        let n = self.n_real();
        &mut self.particles[..n]
    }

    pub fn variational(&self) -> &[Particle] {
        &self.particles[self.n_real()..]
    }

    pub fn get(&self, index: usize) -> Option<&Particle> {
        self.particles.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Particle> {
        self.particles.get_mut(index)
    }

    pub fn index_of_id(&self, id: i64) -> Option<usize> {
        self.real().iter().position(|p| p.id == id)
    }

    /// Append a real particle in front of the shadow block.
    pub fn push_real(&mut self, p: Particle) {
        self.reserve_one();
        let n_real = self.n_real();
        if self.n_var == 0 {
            self.particles.push(p);
        } else {
            self.particles.insert(n_real, p);
        }
        self.invalidate_cells();
    }

    /// Append a shadow at the end of the buffer.
    pub(crate) fn push_variational(&mut self, p: Particle) {
        self.reserve_one();
        self.particles.push(p);
        self.n_var += 1;
        self.invalidate_cells();
    }

    /// Remove real particle `index` (and its shadow, if any).
    ///
    /// `keep_sorted == false` moves the last real particle into the hole
    /// (O(1) without shadows); `true` shifts every later particle down.
    /// Returns `false` without touching anything if `index` is not a real
    /// particle.
    pub fn remove(&mut self, index: usize, keep_sorted: bool) -> bool {
        let n_real = self.n_real();
        if index >= n_real {
            return false;
        }

        if self.n_var == 0 {
            if keep_sorted {
                self.particles.remove(index);
            } else {
                self.particles.swap_remove(index);
            }
        } else if keep_sorted {
            self.particles.remove(n_real + index);
            self.particles.remove(index);
            self.n_var -= 1;
        } else {
            let last_shadow = self.particles.len() - 1;
            self.particles.swap(n_real + index, last_shadow);
            self.particles.pop();
            self.particles.swap(index, n_real - 1);
            self.particles.remove(n_real - 1);
            self.n_var -= 1;
        }

        self.invalidate_cells();
        true
    }

    pub fn remove_by_id(&mut self, id: i64, keep_sorted: bool) -> bool {
        match self.index_of_id(id) {
            Some(index) => self.remove(index, keep_sorted),
            None => false,
        }
    }

    /// Drop every particle, keeping the allocation.
    pub fn clear(&mut self) {
        self.particles.clear();
        self.n_var = 0;
    }

    /// Drop the shadow block only.
    pub(crate) fn clear_variational(&mut self) {
        let n_real = self.n_real();
        self.particles.truncate(n_real);
        self.n_var = 0;
        self.invalidate_cells();
    }

    pub fn invalidate_cells(&mut self) {
        for p in self.particles.iter_mut() {
            p.cell = None;
        }
    }

    // amortized doubling
    fn reserve_one(&mut self) {
        if self.particles.len() == self.particles.capacity() {
            let grow = self.particles.capacity().max(INITIAL_CAPACITY);
            self.particles.reserve_exact(grow);
        }
    }
}
