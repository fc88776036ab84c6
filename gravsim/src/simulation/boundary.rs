//! Boundary conditions and ghost boxes
//!
//! The simulation volume is a grid of `nx * ny * nz` cubic root boxes of side
//! `root_size`, centred on the origin. Periodic and shearing-sheet boundaries
//! see the neighbouring copies of that volume through ghost boxes: a position
//! shift (and, for the shearing sheet, a velocity shift) applied to a
//! particle to get one of its images.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::simulation::states::NVec3;
use crate::simulation::world::SimState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Boundary {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "open")]
    Open, // particles leaving the box are removed
    #[serde(rename = "periodic")]
    Periodic,
    #[serde(rename = "shear")]
    Shear, // shearing sheet, radial axis is x, shear along y
}

/// One image offset. Pure value, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GhostBox {
    pub position: NVec3,
    pub velocity: NVec3,
}

impl GhostBox {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        self.position == NVec3::zeros() && self.velocity == NVec3::zeros()
    }
}

/// Root-grid geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxGeometry {
    pub root_size: f64,
    pub root_n: [usize; 3],
    pub boxsize: NVec3, // root_size * root_n per axis
    pub nghost: [usize; 3],
}

impl BoxGeometry {
    pub fn new(root_size: f64, nx: usize, ny: usize, nz: usize) -> SimResult<Self> {
        if !(root_size > 0.0) || !root_size.is_finite() {
            return Err(SimError::config(format!(
                "root box size must be positive and finite, got {root_size}"
            )));
        }
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(SimError::config(format!(
                "root grid needs at least one box per axis, got {nx} x {ny} x {nz}"
            )));
        }

        Ok(Self {
            root_size,
            root_n: [nx, ny, nz],
            boxsize: NVec3::new(
                root_size * nx as f64,
                root_size * ny as f64,
                root_size * nz as f64,
            ),
            nghost: [0; 3],
        })
    }

    pub fn n_root(&self) -> usize {
        self.root_n[0] * self.root_n[1] * self.root_n[2]
    }

    /// Index of the root box containing `x`, `(k * ny + j) * nx + i`.
    ///
    /// Positions on the upper faces belong to the last box of that axis.
    /// Positions outside the volume are clamped onto the edge boxes; callers
    /// that care check `contains` first.
    pub fn rootbox_for_particle(&self, x: &NVec3) -> usize {
        let [nx, ny, nz] = self.root_n;
        let cell = |coord: f64, half: f64, n: usize| -> usize {
            let raw = ((coord + half) / self.root_size).floor() as i64;
            raw.clamp(0, n as i64 - 1) as usize
        };
        let i = cell(x.x, 0.5 * self.boxsize.x, nx);
        let j = cell(x.y, 0.5 * self.boxsize.y, ny);
        let k = cell(x.z, 0.5 * self.boxsize.z, nz);
        (k * ny + j) * nx + i
    }

    /// Centre of root box `index`
    pub fn root_center(&self, index: usize) -> NVec3 {
        let [nx, ny, _] = self.root_n;
        let i = index % nx;
        let j = (index / nx) % ny;
        let k = index / (nx * ny);
        NVec3::new(
            -0.5 * self.boxsize.x + self.root_size * (i as f64 + 0.5),
            -0.5 * self.boxsize.y + self.root_size * (j as f64 + 0.5),
            -0.5 * self.boxsize.z + self.root_size * (k as f64 + 0.5),
        )
    }

    pub fn contains(&self, x: &NVec3) -> bool {
        let half = 0.5 * self.boxsize;
        x.x.abs() <= half.x && x.y.abs() <= half.y && x.z.abs() <= half.z
    }
}

impl Boundary {
    /// Image offset `(i, j, k)` at time `t`.
    ///
    /// `omega` is the shearing-sheet orbital frequency and only matters for
    /// `Shear`. `None` (or an unconfigured box) always gives the identity.
    pub fn ghost_box(
        self,
        geometry: Option<&BoxGeometry>,
        omega: f64,
        t: f64,
        i: i32,
        j: i32,
        k: i32,
    ) -> GhostBox {
        let g = match (self, geometry) {
            (Boundary::None, _) | (_, None) => return GhostBox::identity(),
            (_, Some(g)) => g,
        };
        let (bx, by, bz) = (g.boxsize.x, g.boxsize.y, g.boxsize.z);
        let (fi, fj, fk) = (i as f64, j as f64, k as f64);

        match self {
            Boundary::Shear => {
                let shift_vy = -1.5 * fi * omega * bx;
                // y offset of the sheared neighbour, wrapped into one period
                let shift = if i == 0 {
                    -(shift_vy * t % by)
                } else if i > 0 {
                    -((shift_vy * t - 0.5 * by) % by) - 0.5 * by
                } else {
                    -((shift_vy * t + 0.5 * by) % by) + 0.5 * by
                };
                GhostBox {
                    position: NVec3::new(bx * fi, by * fj - shift, bz * fk),
                    velocity: NVec3::new(0.0, shift_vy, 0.0),
                }
            }
            _ => GhostBox {
                position: NVec3::new(bx * fi, by * fj, bz * fk),
                velocity: NVec3::zeros(),
            },
        }
    }

    /// Every ghost box in `[-nghost..=nghost]` per axis.
    ///
    /// `cap` limits the ghost count per axis (the collision search uses 1).
    /// `None` and `Open` only ever see the identity.
    pub fn ghost_boxes(
        self,
        geometry: Option<&BoxGeometry>,
        omega: f64,
        t: f64,
        cap: Option<usize>,
    ) -> Vec<GhostBox> {
        let g = match (self, geometry) {
            (Boundary::Periodic | Boundary::Shear, Some(g)) => g,
            _ => return vec![GhostBox::identity()],
        };
        let limit = |n: usize| cap.map_or(n, |c| n.min(c)) as i32;
        let (gx, gy, gz) = (limit(g.nghost[0]), limit(g.nghost[1]), limit(g.nghost[2]));

        let mut boxes = Vec::with_capacity(((2 * gx + 1) * (2 * gy + 1) * (2 * gz + 1)) as usize);
        for i in -gx..=gx {
            for j in -gy..=gy {
                for k in -gz..=gz {
                    boxes.push(self.ghost_box(Some(g), omega, t, i, j, k));
                }
            }
        }
        boxes
    }
}

/// What a boundary check did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundaryOutcome {
    pub wrapped: usize,
    pub removed: usize,
}

/// Enforce the boundary condition on all real particles.
///
/// `Open` removes particles outside the box (order preserving), `Periodic`
/// wraps them back in, `Shear` wraps with the radial offset and the matching
/// change of the shear velocity.
pub fn boundary_check(state: &mut SimState) -> BoundaryOutcome {
    let mut outcome = BoundaryOutcome::default();
    let geometry = match state.geometry {
        Some(g) => g,
        None => return outcome,
    };
    let half = 0.5 * geometry.boxsize;

    match state.boundary {
        Boundary::None => {}
        Boundary::Open => {
            let n = state.particles.n_real();
            for i in (0..n).rev() {
                let outside = state
                    .particles
                    .get(i)
                    .map_or(false, |p| !geometry.contains(&p.x));
                if outside && state.remove(i, true) {
                    outcome.removed += 1;
                }
            }
            if outcome.removed > 0 {
                warn!(
                    "open boundary removed {} particle(s) at t = {:.6e}",
                    outcome.removed, state.t
                );
            }
        }
        Boundary::Periodic => {
            for p in state.particles.real_mut() {
                if wrap_axis(&mut p.x.x, geometry.boxsize.x, half.x)
                    | wrap_axis(&mut p.x.y, geometry.boxsize.y, half.y)
                    | wrap_axis(&mut p.x.z, geometry.boxsize.z, half.z)
                {
                    outcome.wrapped += 1;
                }
            }
        }
        Boundary::Shear => {
            let (bx, by) = (geometry.boxsize.x, geometry.boxsize.y);
            let omega = state.omega;
            let t = state.t;
            let offset_p1 = -((-1.5 * omega * bx * t + 0.5 * by) % by) - 0.5 * by;
            let offset_m1 = -((1.5 * omega * bx * t - 0.5 * by) % by) + 0.5 * by;

            for p in state.particles.real_mut() {
                let mut moved = false;
                if p.x.x > half.x {
                    p.x.x -= bx;
                    p.x.y += offset_p1;
                    p.v.y += 1.5 * omega * bx;
                    moved = true;
                }
                if p.x.x < -half.x {
                    p.x.x += bx;
                    p.x.y += offset_m1;
                    p.v.y -= 1.5 * omega * bx;
                    moved = true;
                }
                moved |= wrap_axis(&mut p.x.y, by, half.y);
                moved |= wrap_axis(&mut p.x.z, geometry.boxsize.z, half.z);
                if moved {
                    outcome.wrapped += 1;
                }
            }
        }
    }

    outcome
}

// periodic wrap of one coordinate, true if it moved
fn wrap_axis(coord: &mut f64, size: f64, half: f64) -> bool {
    if !coord.is_finite() {
        return false;
    }
    let mut moved = false;
    while *coord > half {
        *coord -= size;
        moved = true;
    }
    while *coord < -half {
        *coord += size;
        moved = true;
    }
    moved
}
