//! Collision search and resolution
//!
//! A pair collides when the image-adjusted separation is below `r1 + r2`
//! and the pair is not separating. Events are collected into the per-step
//! buffer on `SimState`, then resolved one after the other; removals asked
//! for by a resolver are applied once every event has been handled.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::simulation::barnes_hut::BarnesHutTree;
use crate::simulation::boundary::{BoxGeometry, GhostBox};
use crate::simulation::hooks::{Hooks, Restitution};
use crate::simulation::states::{NVec3, Particle};
use crate::simulation::world::SimState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollisionMode {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "tree")]
    Tree,
}

/// One contact: `p1 < p2`, `gb` is the image shift applied to `p1`, `ri` the
/// root box the contact was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collision {
    pub p1: usize,
    pub p2: usize,
    pub gb: GhostBox,
    pub ri: usize,
}

impl Collision {
    /// Separation `x1 + shift - x2`
    pub fn separation(&self, particles: &[Particle]) -> NVec3 {
        particles[self.p1].x + self.gb.position - particles[self.p2].x
    }

    /// Relative velocity `v1 + shift - v2`
    pub fn relative_velocity(&self, particles: &[Particle]) -> NVec3 {
        particles[self.p1].v + self.gb.velocity - particles[self.p2].v
    }
}

/// What a resolver wants done with the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionOutcome {
    #[default]
    Keep,
    RemoveFirst,
    RemoveSecond,
    RemoveBoth,
}

/// Fill `state.collisions` for the current positions.
pub fn search(state: &mut SimState) {
    state.collisions.clear();
    match state.collision {
        CollisionMode::None => {}
        CollisionMode::Direct => {
            let ghosts = state.ghost_boxes(Some(1));
            search_direct(
                state.particles.real(),
                &ghosts,
                state.geometry.as_ref(),
                &mut state.collisions,
            );
        }
        CollisionMode::Tree => {
            let ghosts = state.ghost_boxes(Some(1));
            state.rebuild_tree();
            if let Some(tree) = state.tree.as_ref() {
                search_tree(
                    state.particles.real(),
                    tree,
                    &ghosts,
                    state.max_radius,
                    &mut state.collisions,
                );
            }
        }
    }
    if !state.collisions.is_empty() {
        debug!("{} collision(s) found at t = {:.6e}", state.collisions.len(), state.t);
    }
}

/// All pairs `i < j` against every ghost image of `i`
pub fn search_direct(
    particles: &[Particle],
    ghosts: &[GhostBox],
    geometry: Option<&BoxGeometry>,
    out: &mut Vec<Collision>,
) {
    let n = particles.len();
    for gb in ghosts {
        for i in 0..n {
            let q = particles[i].x + gb.position;
            let qv = particles[i].v + gb.velocity;
            let ri = geometry.map_or(0, |g| g.rootbox_for_particle(&particles[i].x));
            for j in (i + 1)..n {
                if in_contact(q, qv, particles[i].r, &particles[j]) {
                    out.push(Collision { p1: i, p2: j, gb: *gb, ri });
                }
            }
        }
    }
}

/// Tree-accelerated search: per particle, per ghost image, walk only the
/// cells within reach of the image. Each pair is reported once, from its
/// lower index.
pub fn search_tree(
    particles: &[Particle],
    tree: &BarnesHutTree,
    ghosts: &[GhostBox],
    max_radius: [f64; 2],
    out: &mut Vec<Collision>,
) {
    for i in 0..particles.len() {
        // particles outside the tree cannot be matched reliably
        if particles[i].cell.is_none() {
            continue;
        }
        let reach = particles[i].r + max_radius[0] + max_radius[1];
        for gb in ghosts {
            let q = particles[i].x + gb.position;
            let qv = particles[i].v + gb.velocity;
            tree.neighbours_within(q, reach, &mut |j, ri| {
                if j > i && in_contact(q, qv, particles[i].r, &particles[j]) {
                    out.push(Collision { p1: i, p2: j, gb: *gb, ri });
                }
            });
        }
    }
}

/// Resolve every buffered event and apply removals. Returns the number of
/// events resolved.
pub fn resolve(state: &mut SimState, hooks: &mut Hooks) -> usize {
    let mut events = std::mem::take(&mut state.collisions);
    let t = state.t;
    let min_v = state.minimum_collision_velocity;
    let mut removals: Vec<usize> = Vec::new();
    let mut resolved = 0;

    for c in &events {
        let particles = state.particles.real_mut();
        if c.p1 >= particles.len() || c.p2 >= particles.len() {
            continue;
        }
        if particles[c.p1].last_collision == t || particles[c.p2].last_collision == t {
            continue;
        }
        if removals.contains(&c.p1) || removals.contains(&c.p2) {
            continue;
        }

        // momentum exchange is measured on the radially outer particle
        let x21 = c.separation(particles).x;
        let outer = if x21 > 0.0 { c.p1 } else { c.p2 };
        let (outer_vy, outer_m) = (particles[outer].v.y, particles[outer].m);

        let outcome = match hooks.collision_resolver.as_mut() {
            Some(resolver) => {
                let outcome = resolver.resolve(t, particles, c);
                particles[c.p1].last_collision = t;
                particles[c.p2].last_collision = t;
                outcome
            }
            None => match hard_sphere(particles, c, t, hooks.restitution.as_mut(), min_v) {
                Some(outcome) => outcome,
                None => continue,
            },
        };

        state.collisions_plog += -x21.abs() * (outer_vy - particles[outer].v.y) * outer_m;
        state.collisions_nlog += 1;
        resolved += 1;

        match outcome {
            CollisionOutcome::Keep => {}
            CollisionOutcome::RemoveFirst => removals.push(c.p1),
            CollisionOutcome::RemoveSecond => removals.push(c.p2),
            CollisionOutcome::RemoveBoth => removals.extend([c.p1, c.p2]),
        }
    }

    removals.sort_unstable_by(|a, b| b.cmp(a));
    removals.dedup();
    for index in removals {
        state.remove(index, true);
    }
    // resolvers may have changed radii
    if resolved > 0 {
        state.update_max_radius();
    }

    events.clear();
    state.collisions = events;
    resolved
}

/// Hard-sphere bounce with restitution.
///
/// The relative velocity is rotated onto the line of centres, the normal
/// component is reflected with coefficient `eps` (at least
/// `minimum_collision_velocity` scaled by the overlap), rotated back, and
/// shared between the particles by mass. Returns `None` without touching
/// anything if the pair no longer overlaps or is separating.
pub fn hard_sphere(
    particles: &mut [Particle],
    c: &Collision,
    t: f64,
    restitution: Option<&mut Box<dyn Restitution>>,
    minimum_collision_velocity: f64,
) -> Option<CollisionOutcome> {
    let p1 = particles[c.p1];
    let p2 = particles[c.p2];

    let d = c.separation(particles);
    let rp = p1.r + p2.r;
    if rp * rp < d.norm_squared() {
        return None;
    }
    let dv = c.relative_velocity(particles);
    if dv.dot(&d) > 0.0 {
        return None;
    }

    // rotate into the xy plane, then onto the x axis
    let theta = d.z.atan2(d.y);
    let (stheta, ctheta) = theta.sin_cos();
    let vy21n = ctheta * dv.y + stheta * dv.z;
    let y21n = ctheta * d.y + stheta * d.z;

    let phi = y21n.atan2(d.x);
    let (sphi, cphi) = phi.sin_cos();
    let vx21nn = cphi * dv.x + sphi * vy21n;

    let eps = restitution.map_or(1.0, |f| f.coefficient(vx21nn.abs()));
    let mut dvx2 = -(1.0 + eps) * vx21nn;

    let min_r = p1.r.min(p2.r);
    let max_r = p1.r.max(p2.r);
    if min_r > 0.0 {
        let mut mindv = min_r * minimum_collision_velocity;
        mindv *= 1.0 - (d.norm() - max_r) / min_r;
        if mindv > max_r * minimum_collision_velocity {
            mindv = max_r * minimum_collision_velocity;
        }
        if dvx2 < mindv {
            dvx2 = mindv;
        }
    }

    // and back
    let dvx2n = cphi * dvx2;
    let dvy2n = sphi * dvx2;
    let delta = NVec3::new(dvx2n, ctheta * dvy2n, stheta * dvy2n);

    let m_tot = p1.m + p2.m;
    let (f1, f2) = if m_tot > 0.0 {
        (p2.m / m_tot, p1.m / m_tot)
    } else {
        (0.5, 0.5)
    };

    particles[c.p2].v -= f2 * delta;
    particles[c.p2].last_collision = t;
    particles[c.p1].v += f1 * delta;
    particles[c.p1].last_collision = t;

    Some(CollisionOutcome::Keep)
}

// overlap of the image at (q, qv) with radius r against p, and approaching
fn in_contact(q: NVec3, qv: NVec3, r: f64, p: &Particle) -> bool {
    let d = q - p.x;
    let rp = r + p.r;
    if d.norm_squared() >= rp * rp {
        return false;
    }
    let dv = qv - p.v;
    dv.dot(&d) <= 0.0
}
