//! # Barnes–Hut Octree
//!
//! One octree per root box, all stored in a single node pool that is thrown
//! away and rebuilt whenever the particle positions change. The tree serves
//! two queries:
//!
//! - **gravity**: walk the tree from a target position, treating a node as a
//!   single mass at its centre of mass once it is small enough as seen from
//!   the target (`width² <= opening_angle2 * distance²`), and descending
//!   otherwise. Leaves always give the exact pairwise term.
//! - **neighbours**: walk only the cells that can hold a particle touching a
//!   sphere around the target; used by the collision search.
//!
//! ## Layout
//!
//! - Nodes live in `BarnesHutTree::nodes` and are addressed by [`NodeId`].
//! - A node is either a leaf holding one particle index, or an internal node
//!   with up to 8 children (octants).
//! - Every node stores the total mass and centre of mass of its subtree,
//!   filled bottom-up after all insertions.
//! - Each particle's `cell` points at the leaf holding it. Those ids are only
//!   meaningful for the pool that produced them; tearing the tree down (or
//!   changing the particle count) clears them.
//!
//! Particles that sit outside every root box are left out of the tree (and
//! logged). That only happens with a box geometry; without one the root cube
//! is fitted around all particles.
//! Coincident particles cannot be separated by subdivision; once the depth
//! limit is hit they are chained onto the existing leaf instead.

use log::{debug, warn};

use crate::simulation::boundary::BoxGeometry;
use crate::simulation::states::{NVec3, Particle};

/// Subdivision depth after which coincident particles share a leaf chain
const MAX_DEPTH: usize = 64;

/// `sqrt(3) / 2`: centre-to-corner distance of a unit cube
const HALF_DIAGONAL: f64 = 0.866_025_403_784_438_6;

/// Index of a node in the per-build node pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    /// One particle. `next` chains particles that share the same position.
    Leaf { body: usize, next: Option<NodeId> },
    Internal { children: [Option<NodeId>; 8] },
}

/// A single octree node: a cube of side `width` centred on `center`.
#[derive(Debug, Clone)]
pub struct BarnesHutNode {
    pub mass: f64,
    pub com: NVec3,
    pub center: NVec3,
    pub width: f64,
    pub kind: NodeKind,
}

impl BarnesHutNode {
    /// True if `x` lies in this node's cube, faces included.
    pub fn bounds(&self, x: &NVec3) -> bool {
        let half = 0.5 * self.width;
        (x - self.center).iter().all(|d| d.abs() <= half)
    }
}

/// Parameters of one gravity walk
struct GravityWalk<'a> {
    target: usize,
    exclude: Option<(usize, NVec3)>, // index and position of the skipped partner
    query: NVec3,
    particles: &'a [Particle],
    G: f64,
    eps2: f64,
    opening_angle2: f64,
}

/// All root-box octrees built over the real particles.
#[derive(Debug, Clone, Default)]
pub struct BarnesHutTree {
    pub nodes: Vec<BarnesHutNode>,
    pub roots: Vec<Option<NodeId>>, // one slot per root box
    pub skipped: usize,             // particles outside every root box
}

impl BarnesHutTree {
    /// Build the trees for `particles` and point every inserted particle's
    /// `cell` at its leaf.
    ///
    /// - With a configured box, root box `r` is the cube
    ///   `geometry.root_center(r) ± root_size / 2`; particles outside the
    ///   whole volume are skipped.
    /// - Without one, a single cube is fitted around all particles.
    ///
    /// Only the first `n_active` particles carry mass in the aggregates, so
    /// test particles are found by neighbour queries but source no gravity.
    pub fn build(particles: &mut [Particle], n_active: usize, geometry: Option<&BoxGeometry>) -> Self {
        for p in particles.iter_mut() {
            p.cell = None;
        }

        let (root_centers, root_width) = match geometry {
            Some(g) => ((0..g.n_root()).map(|r| g.root_center(r)).collect::<Vec<_>>(), g.root_size),
            None => {
                let (center, width) = compute_global_cube(particles);
                (vec![center], width)
            }
        };

        let mut tree = BarnesHutTree {
            nodes: Vec::with_capacity(2 * particles.len()),
            roots: vec![None; root_centers.len()],
            skipped: 0,
        };

        for i in 0..particles.len() {
            let x = particles[i].x;
            let root = match geometry {
                Some(g) if g.contains(&x) => g.rootbox_for_particle(&x),
                Some(_) => {
                    tree.skipped += 1;
                    continue;
                }
                None if x.iter().all(|c| c.is_finite()) => 0,
                None => {
                    tree.skipped += 1;
                    continue;
                }
            };
            let slot = tree.roots[root];
            let id = tree.insert_body(slot, root_centers[root], root_width, i, particles, 0);
            tree.roots[root] = Some(id);
        }

        let roots = tree.roots.clone();
        for root in roots.into_iter().flatten() {
            tree.compute_mass_and_com(root, particles, n_active);
        }

        debug!(
            "tree rebuilt: {} nodes over {} root box(es)",
            tree.nodes.len(),
            tree.roots.len()
        );
        if tree.skipped > 0 {
            warn!(
                "{} particle(s) outside every root box left out of the tree",
                tree.skipped
            );
        }
        tree
    }

    pub fn node(&self, id: NodeId) -> &BarnesHutNode {
        &self.nodes[id.0]
    }

    /// Total mass over all root boxes
    pub fn total_mass(&self) -> f64 {
        self.roots.iter().flatten().map(|id| self.nodes[id.0].mass).sum()
    }

    /// Particle indices stored at a leaf, following the coincidence chain.
    pub fn leaf_bodies(&self, id: NodeId) -> LeafBodies<'_> {
        LeafBodies { tree: self, next: Some(id) }
    }

    /// Acceleration at `query` from every active particle in the trees,
    /// skipping particle `target` itself and, if given, particle `exclude`.
    ///
    /// Cells holding `exclude` are always opened, so its mass never reaches
    /// the target through an aggregate either.
    #[allow(clippy::too_many_arguments)]
    pub fn acceleration_at(
        &self,
        target: usize,
        exclude: Option<usize>,
        query: NVec3,
        particles: &[Particle],
        G: f64,
        eps2: f64,
        opening_angle2: f64,
    ) -> NVec3 {
        let walk = GravityWalk {
            target,
            exclude: exclude.and_then(|e| particles.get(e).map(|p| (e, p.x))),
            query,
            particles,
            G,
            eps2,
            opening_angle2,
        };
        let mut acc = NVec3::zeros();
        for root in self.roots.iter().flatten() {
            self.gravity_from_node(*root, &walk, &mut acc);
        }
        acc
    }

    /// Visit every particle whose leaf may lie within `reach` of `query`.
    ///
    /// A cell is opened when its centre is closer than
    /// `reach + sqrt(3)/2 * width`, so no particle within `reach` is missed.
    /// The callback receives `(particle index, root box index)`.
    pub fn neighbours_within<F>(&self, query: NVec3, reach: f64, visit: &mut F)
    where
        F: FnMut(usize, usize),
    {
        for (ri, root) in self.roots.iter().enumerate() {
            if let Some(root) = root {
                self.neighbours_in_node(*root, ri, query, reach, visit);
            }
        }
    }

    // helpers ==============================================================================

    /// Insert particle `body` below `slot` (a node covering the cube at
    /// `center` with side `width`) and return the id now occupying the slot.
    ///
    /// - empty slot: a new leaf.
    /// - leaf: the leaf turns into an internal node, and both the resident
    ///   particle and the new one are pushed into the proper octants. Past
    ///   `MAX_DEPTH` the new particle is chained onto the leaf instead.
    /// - internal node: forward into the octant containing the particle.
    fn insert_body(
        &mut self,
        slot: Option<NodeId>,
        center: NVec3,
        width: f64,
        body: usize,
        particles: &[Particle],
        depth: usize,
    ) -> NodeId {
        let id = match slot {
            None => return self.push_node(center, width, NodeKind::Leaf { body, next: None }),
            Some(id) => id,
        };

        match self.nodes[id.0].kind {
            NodeKind::Leaf { body: resident, next } => {
                if depth >= MAX_DEPTH {
                    let chained = self.push_node(center, width, NodeKind::Leaf { body, next });
                    self.nodes[id.0].kind = NodeKind::Leaf {
                        body: resident,
                        next: Some(chained),
                    };
                    return id;
                }
                self.nodes[id.0].kind = NodeKind::Internal { children: [None; 8] };
                self.insert_into_octant(id, resident, particles, depth);
                self.insert_into_octant(id, body, particles, depth);
            }
            NodeKind::Internal { .. } => self.insert_into_octant(id, body, particles, depth),
        }
        id
    }

    fn insert_into_octant(&mut self, parent: NodeId, body: usize, particles: &[Particle], depth: usize) {
        let (center, width, kind) = {
            let node = &self.nodes[parent.0];
            (node.center, node.width, node.kind)
        };
        let octant = child_index_for_point(&particles[body].x, &center);
        let slot = match kind {
            NodeKind::Internal { children } => children[octant],
            NodeKind::Leaf { .. } => None,
        };

        let child = self.insert_body(
            slot,
            child_center(&center, width, octant),
            0.5 * width,
            body,
            particles,
            depth + 1,
        );

        if let NodeKind::Internal { children } = &mut self.nodes[parent.0].kind {
            children[octant] = Some(child);
        }
    }

    fn push_node(&mut self, center: NVec3, width: f64, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(BarnesHutNode {
            mass: 0.0,
            com: NVec3::zeros(),
            center,
            width,
            kind,
        });
        id
    }

    /// Bottom-up pass filling `mass` and `com`, and pointing each particle's
    /// `cell` at its leaf.
    fn compute_mass_and_com(&mut self, id: NodeId, particles: &mut [Particle], n_active: usize) {
        let mut mass = 0.0;
        let mut weighted = NVec3::zeros();

        match self.nodes[id.0].kind {
            NodeKind::Leaf { .. } => {
                let bodies: Vec<usize> = self.leaf_bodies(id).collect();
                for b in bodies {
                    particles[b].cell = Some(id);
                    if b < n_active {
                        mass += particles[b].m;
                        weighted += particles[b].x * particles[b].m;
                    }
                }
            }
            NodeKind::Internal { children } => {
                for child in children.iter().flatten() {
                    self.compute_mass_and_com(*child, particles, n_active);
                    let cn = &self.nodes[child.0];
                    mass += cn.mass;
                    weighted += cn.com * cn.mass;
                }
            }
        }

        let node = &mut self.nodes[id.0];
        node.mass = mass;
        node.com = if mass != 0.0 { weighted / mass } else { node.center };
    }

    fn gravity_from_node(&self, id: NodeId, walk: &GravityWalk<'_>, acc: &mut NVec3) {
        let node = &self.nodes[id.0];
        if node.mass == 0.0 {
            return;
        }
        let (G, eps2, query) = (walk.G, walk.eps2, walk.query);

        match node.kind {
            NodeKind::Leaf { .. } => {
                for b in self.leaf_bodies(id) {
                    if b == walk.target || walk.exclude.is_some_and(|(e, _)| e == b) {
                        continue;
                    }
                    let p = &walk.particles[b];
                    let d = p.x - query;
                    let r2 = d.norm_squared() + eps2;
                    if r2 == 0.0 {
                        continue;
                    }
                    let inv_r = r2.sqrt().recip();
                    *acc += G * p.m * inv_r * inv_r * inv_r * d;
                }
            }
            NodeKind::Internal { children } => {
                let d = node.com - query;
                let dist2 = d.norm_squared();
                let holds_excluded = walk.exclude.is_some_and(|(_, x)| node.bounds(&x));
                if holds_excluded || node.width * node.width > walk.opening_angle2 * dist2 {
                    for child in children.iter().flatten() {
                        self.gravity_from_node(*child, walk, acc);
                    }
                } else {
                    let r2 = dist2 + eps2;
                    let inv_r = r2.sqrt().recip();
                    *acc += G * node.mass * inv_r * inv_r * inv_r * d;
                }
            }
        }
    }

    fn neighbours_in_node<F>(&self, id: NodeId, ri: usize, query: NVec3, reach: f64, visit: &mut F)
    where
        F: FnMut(usize, usize),
    {
        let node = &self.nodes[id.0];
        match node.kind {
            NodeKind::Leaf { .. } => {
                for b in self.leaf_bodies(id) {
                    visit(b, ri);
                }
            }
            NodeKind::Internal { children } => {
                let open = reach + HALF_DIAGONAL * node.width;
                if (node.center - query).norm_squared() < open * open {
                    for child in children.iter().flatten() {
                        self.neighbours_in_node(*child, ri, query, reach, visit);
                    }
                }
            }
        }
    }
}

/// Iterator over the particles of one leaf chain
pub struct LeafBodies<'a> {
    tree: &'a BarnesHutTree,
    next: Option<NodeId>,
}

impl Iterator for LeafBodies<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let id = self.next?;
        match self.tree.nodes[id.0].kind {
            NodeKind::Leaf { body, next } => {
                self.next = next;
                Some(body)
            }
            NodeKind::Internal { .. } => None,
        }
    }
}

// helpers ===========================================================================

/// Cube (centre, side) enclosing every particle with a finite position.
///
/// Expanding the axis-aligned box to a cube keeps node size well defined
/// for the opening criterion. A degenerate box (zero or one particle, or all
/// coincident) gets unit side.
fn compute_global_cube(particles: &[Particle]) -> (NVec3, f64) {
    let mut min = NVec3::repeat(f64::INFINITY);
    let mut max = NVec3::repeat(f64::NEG_INFINITY);

    for p in particles.iter().filter(|p| p.x.iter().all(|c| c.is_finite())) {
        min = min.inf(&p.x);
        max = max.sup(&p.x);
    }

    if min.x > max.x {
        return (NVec3::zeros(), 1.0);
    }

    let center = (min + max) * 0.5;
    let extent = (max - min).max();
    // pad slightly so particles on the faces stay strictly inside
    let width = if extent > 0.0 { extent * (1.0 + 1e-9) } else { 1.0 };
    (center, width)
}

/// Octant of `p` relative to `center`: bit 0 = x, bit 1 = y, bit 2 = z,
/// set when the coordinate is on the upper side.
fn child_index_for_point(p: &NVec3, center: &NVec3) -> usize {
    let mut idx = 0;

    if p.x >= center.x { idx |= 1; }
    if p.y >= center.y { idx |= 2; }
    if p.z >= center.z { idx |= 4; }

    idx
}

/// Centre of octant `child_idx` of the cube at `center` with side `width`
fn child_center(center: &NVec3, width: f64, child_idx: usize) -> NVec3 {
    let q = 0.25 * width;
    let sign = |bit: usize| if child_idx & bit == 0 { -q } else { q };
    center + NVec3::new(sign(1), sign(2), sign(4))
}
