//! IAS15: 15th-order Gauss–Radau integrator with adaptive steps
//!
//! Every coordinate (three per particle, shadows included) carries seven
//! coefficients `b0..b6` of the acceleration polynomial over the step. A
//! predictor-corrector iterates over the seven Radau substeps until the
//! change in `b6` falls below machine precision, then the step size is
//! adjusted from the size of `b6` relative to the accelerations:
//!
//! `dt_new = dt * (epsilon / error)^(1/7)`
//!
//! A proposed step more than four times smaller than the one just taken
//! rejects the step, which is redone with the smaller `dt`. Positions and
//! velocities are advanced with compensated summation, and the `b` of an
//! accepted step seed the predictor of the next.
//!
//! A predictor-corrector that has not settled after twelve iterations is
//! never accepted: the step is retried with a quarter of `dt`. Ten such
//! failures in a row, a step that cannot shrink any further, or a
//! non-finite acceleration are reported as [`SimError::NonConvergence`].

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::simulation::forces::compensated_add;
use crate::simulation::hooks::Hooks;
use crate::simulation::world::SimState;

/// Gauss–Radau spacings of the substeps
const H: [f64; 8] = [
    0.0,
    0.0562625605369221464656521910318,
    0.180240691736892364987579942780,
    0.352624717113169637373907769648,
    0.547153626330555383001448554766,
    0.734210177215410531523210605558,
    0.885320946839095768090359771030,
    0.977520613561287501891174488626,
];
/// Differences of the spacings, `g` from the substep accelerations
const RR: [f64; 28] = [
    0.0562625605369221464656522, 0.1802406917368923649875799, 0.1239781311999702185219278,
    0.3526247171131696373739078, 0.2963621565762474909082556, 0.1723840253762772723863278,
    0.5471536263305553830014486, 0.4908910657936332365357964, 0.3669129345936630180138686,
    0.1945289092173857456275408, 0.7342101772154105315232106, 0.6779476166784883850575584,
    0.5539694854785181665356307, 0.3815854601022408941493028, 0.1870565508848551485217621,
    0.8853209468390957680903598, 0.8290583863021736216247076, 0.7050802551022034031027798,
    0.5326962297259261307164520, 0.3381673205085403850889112, 0.1511107696236852365671492,
    0.9775206135612875018911745, 0.9212580530243653554255223, 0.7972799218243951369035945,
    0.6248958964481178645172667, 0.4303669872307321188897259, 0.2433104363458769703679639,
    0.0921996667221917338008147,
];
/// `g` to `b`
const C: [f64; 21] = [
    -0.0562625605369221464656522, 0.0101408028300636299864818, -0.2365032522738145114532321,
    -0.0035758977292516175949345, 0.0935376952594620658957485, -0.5891279693869841488271399,
    0.0019565654099472210769006, -0.0547553868890686864408084, 0.4158812000823068616886219,
    -1.1362815957175395318285885, -0.0014365302363708915424460, 0.0421585277212687077072973,
    -0.3600995965020568122897665, 1.2501507118406910258505441, -1.8704917729329500633517991,
    0.0012717903090268677492943, -0.0387603579159067703699046, 0.3609622434528459832253398,
    -1.4668842084004269643701553, 2.9061362593084293014237913, -2.7558127197720458314421588,
];
/// `b` to `g`
const D: [f64; 21] = [
    0.0562625605369221464656522, 0.0031654757181708292499905, 0.2365032522738145114532321,
    0.0001780977692217433881125, 0.0457929855060279188954539, 0.5891279693869841488271399,
    0.0000100202365223291272096, 0.0084318571535257015445000, 0.2535340690545692665214616,
    1.1362815957175395318285885, 0.0000005637641639318207610, 0.0015297840025004658189490,
    0.0978342365324440053653648, 0.8752546646840910912297246, 1.8704917729329500633517991,
    0.0000000317188154017613665, 0.0002762930909826476593130, 0.0360285539837364596003871,
    0.5767330002770787313544596, 2.2485887607691597933926895, 2.7558127197720458314421588,
];

const SAFETY_FACTOR: f64 = 0.25;
const MAX_PREDICTOR_ITERATIONS: usize = 12;
const MAX_CONSECUTIVE_CAP_HITS: u32 = 10;

/// Seven coefficient arrays, one entry per coordinate
type Coefficients = [Vec<f64>; 7];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ias15Settings {
    /// Step-size precision; `0` turns the adaptive step off.
    pub epsilon: f64,
    pub min_dt: f64,
    /// Compare the largest `b6` to the largest acceleration (true), or use
    /// the largest per-coordinate ratio (false).
    pub epsilon_global: bool,
}

impl Default for Ias15Settings {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            min_dt: 0.0,
            epsilon_global: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ias15 {
    pub settings: Ias15Settings,
    pub rejected_steps: u64,
    pub cap_hits: u64,

    consecutive_cap_hits: u32,
    dt_last_success: f64,
    epoch: Option<u64>, // particle layout the arrays are sized for

    x0: Vec<f64>,
    v0: Vec<f64>,
    a0: Vec<f64>,
    at: Vec<f64>,  // accelerations at the current substep
    csx: Vec<f64>, // compensated-summation carries for x and v
    csv: Vec<f64>,

    g: Coefficients,
    b: Coefficients,
    csb: Coefficients,
    e: Coefficients,  // predicted b
    br: Coefficients, // b of the last accepted step
    er: Coefficients,
}

enum Attempt {
    Accepted,
    Retry,
}

impl Ias15 {
    pub fn new(settings: Ias15Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn advance(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<()> {
        loop {
            match self.try_step(state, hooks)? {
                Attempt::Accepted => return Ok(()),
                Attempt::Retry => continue,
            }
        }
    }

    /// Particles were changed from outside: the carries no longer apply.
    pub fn particles_modified(&mut self) {
        self.csx.iter_mut().for_each(|c| *c = 0.0);
        self.csv.iter_mut().for_each(|c| *c = 0.0);
    }

    /// Forget every coefficient and carry; the next step starts cold.
    pub fn reset(&mut self) {
        self.epoch = None;
        self.dt_last_success = 0.0;
        self.consecutive_cap_hits = 0;
        self.resize(0);
    }

    fn resize(&mut self, n3: usize) {
        for v in [
            &mut self.x0,
            &mut self.v0,
            &mut self.a0,
            &mut self.at,
            &mut self.csx,
            &mut self.csv,
        ] {
            v.clear();
            v.resize(n3, 0.0);
        }
        for coeffs in [
            &mut self.g,
            &mut self.b,
            &mut self.csb,
            &mut self.e,
            &mut self.br,
            &mut self.er,
        ] {
            for v in coeffs.iter_mut() {
                v.clear();
                v.resize(n3, 0.0);
            }
        }
    }

    fn try_step(&mut self, state: &mut SimState, hooks: &mut Hooks) -> SimResult<Attempt> {
        let n = state.particles.len();
        let n3 = 3 * n;
        let n3_real = 3 * state.particles.n_real();
        if self.epoch != Some(state.layout_epoch) || self.x0.len() != n3 {
            self.resize(n3);
            self.dt_last_success = 0.0;
            self.epoch = Some(state.layout_epoch);
        }

        let dt = state.dt;
        let t_beginning = state.t;
        if !dt.is_finite() || dt == 0.0 {
            return Err(non_convergence(t_beginning, dt, "step size collapsed"));
        }

        state.update_acceleration(hooks);
        for (i, p) in state.particles.as_slice().iter().enumerate() {
            for c in 0..3 {
                self.x0[3 * i + c] = p.x[c];
                self.v0[3 * i + c] = p.v[c];
                self.a0[3 * i + c] = p.a[c];
            }
        }
        if !self.a0[..n3_real].iter().all(|a| a.is_finite()) {
            return Err(non_convergence(t_beginning, dt, "non-finite acceleration"));
        }

        for k in 0..n3 {
            let [b0, b1, b2, b3, b4, b5, b6] = [0, 1, 2, 3, 4, 5, 6].map(|m| self.b[m][k]);
            self.g[0][k] = b6 * D[15] + b5 * D[10] + b4 * D[6] + b3 * D[3] + b2 * D[1] + b1 * D[0] + b0;
            self.g[1][k] = b6 * D[16] + b5 * D[11] + b4 * D[7] + b3 * D[4] + b2 * D[2] + b1;
            self.g[2][k] = b6 * D[17] + b5 * D[12] + b4 * D[8] + b3 * D[5] + b2;
            self.g[3][k] = b6 * D[18] + b5 * D[13] + b4 * D[9] + b3;
            self.g[4][k] = b6 * D[19] + b5 * D[14] + b4;
            self.g[5][k] = b6 * D[20] + b5;
            self.g[6][k] = b6;
        }
        for v in self.csb.iter_mut() {
            v.iter_mut().for_each(|c| *c = 0.0);
        }

        // predictor-corrector
        let mut predictor_corrector_error = f64::MAX;
        let mut last_error = 2.0;
        let mut iterations = 0;
        loop {
            if predictor_corrector_error < 1e-16 {
                break;
            }
            if iterations > 2 && last_error <= predictor_corrector_error {
                break;
            }
            if iterations >= MAX_PREDICTOR_ITERATIONS {
                return self.cap_hit(state, t_beginning, dt);
            }
            iterations += 1;
            last_error = predictor_corrector_error;
            predictor_corrector_error = 0.0;

            for substep in 1..8 {
                state.t = t_beginning + H[substep] * dt;
                self.predict_substep(state, H[substep], dt);
                state.update_acceleration(hooks);

                for (i, p) in state.particles.as_slice().iter().enumerate() {
                    for c in 0..3 {
                        self.at[3 * i + c] = p.a[c];
                    }
                }
                if !self.at[..n3_real].iter().all(|a| a.is_finite()) {
                    self.restore(state, t_beginning);
                    return Err(non_convergence(t_beginning, dt, "non-finite acceleration"));
                }

                let max_db6 = self.correct(substep, n3, n3_real);
                if substep == 7 {
                    let max_a = self.at[..n3_real].iter().fold(0.0_f64, |m, a| m.max(a.abs()));
                    predictor_corrector_error = if max_a > 0.0 { max_db6 / max_a } else { 0.0 };
                }
            }
        }
        self.consecutive_cap_hits = 0;

        // step-size control
        let dt_done = dt;
        if self.settings.epsilon > 0.0 {
            let error = self.integrator_error(n3_real);
            let mut dt_new = if error.is_normal() {
                (self.settings.epsilon / error).powf(1.0 / 7.0) * dt_done
            } else {
                dt_done / SAFETY_FACTOR
            };
            if dt_new.abs() < self.settings.min_dt {
                dt_new = self.settings.min_dt.copysign(dt_new);
            }

            if (dt_new / dt_done).abs() < SAFETY_FACTOR {
                // reject, redo with the smaller step
                self.restore(state, t_beginning);
                state.dt = dt_new;
                if self.dt_last_success != 0.0 {
                    self.predict_next_step(dt_new / self.dt_last_success);
                }
                self.rejected_steps += 1;
                debug!("IAS15 step rejected at t = {t_beginning:.6e}: dt {dt_done:.3e} -> {dt_new:.3e}");
                return Ok(Attempt::Retry);
            }

            if (dt_new / dt_done).abs() > 1.0 / SAFETY_FACTOR {
                dt_new = dt_done / SAFETY_FACTOR;
            }
            state.dt = dt_new;
        }

        self.advance_coordinates(dt_done, n3);
        for (i, p) in state.particles.as_mut_slice().iter_mut().enumerate() {
            for c in 0..3 {
                p.x[c] = self.x0[3 * i + c];
                p.v[c] = self.v0[3 * i + c];
            }
        }
        if !self.x0[..n3_real].iter().all(|x| x.is_finite()) {
            return Err(non_convergence(t_beginning, dt_done, "non-finite position"));
        }

        state.t = t_beginning + dt_done;
        state.dt_last_done = dt_done;
        self.dt_last_success = dt_done;

        for m in 0..7 {
            self.er[m].copy_from_slice(&self.e[m]);
            self.br[m].copy_from_slice(&self.b[m]);
        }
        self.predict_next_step(state.dt / dt_done);
        Ok(Attempt::Accepted)
    }

    fn predict_substep(&self, state: &mut SimState, s: f64, dt: f64) {
        let velocity_dependent = state.force_is_velocity_dependent;
        let b = &self.b;
        for (i, p) in state.particles.as_mut_slice().iter_mut().enumerate() {
            for c in 0..3 {
                let k = 3 * i + c;
                p.x[c] = -self.csx[k]
                    + ((((((((b[6][k] * 7.0 * s / 9.0 + b[5][k]) * 3.0 * s / 4.0 + b[4][k]) * 5.0 * s
                        / 7.0
                        + b[3][k])
                        * 2.0
                        * s
                        / 3.0
                        + b[2][k])
                        * 3.0
                        * s
                        / 5.0
                        + b[1][k])
                        * s
                        / 2.0
                        + b[0][k])
                        * s
                        / 3.0
                        + self.a0[k])
                        * dt
                        * s
                        / 2.0
                        + self.v0[k])
                        * dt
                        * s
                    + self.x0[k];
                if velocity_dependent {
                    p.v[c] = -self.csv[k]
                        + (((((((b[6][k] * 7.0 * s / 8.0 + b[5][k]) * 6.0 * s / 7.0 + b[4][k]) * 5.0 * s
                            / 6.0
                            + b[3][k])
                            * 4.0
                            * s
                            / 5.0
                            + b[2][k])
                            * 3.0
                            * s
                            / 4.0
                            + b[1][k])
                            * 2.0
                            * s
                            / 3.0
                            + b[0][k])
                            * s
                            / 2.0
                            + self.a0[k])
                            * s
                            * dt
                        + self.v0[k];
                }
            }
        }
    }

    /// Update `g[substep - 1]` from the new accelerations and fold the change
    /// into `b`. Returns the largest change of `b6` over the real
    /// coordinates (only meaningful for the last substep).
    fn correct(&mut self, substep: usize, n3: usize, n3_real: usize) -> f64 {
        let j = substep - 1;
        let rr0 = j * (j + 1) / 2;
        let c0 = if j > 0 { (j - 1) * j / 2 } else { 0 };
        let mut max_db6 = 0.0_f64;

        for k in 0..n3 {
            let gk = self.at[k] - self.a0[k];
            let mut gj = gk / RR[rr0];
            for m in 0..j {
                gj = (gj - self.g[m][k]) / RR[rr0 + m + 1];
            }
            let tmp = gj - self.g[j][k];
            self.g[j][k] = gj;

            for m in 0..j {
                compensated_add(&mut self.b[m][k], tmp * C[c0 + m], &mut self.csb[m][k]);
            }
            compensated_add(&mut self.b[j][k], tmp, &mut self.csb[j][k]);

            if j == 6 && k < n3_real {
                max_db6 = max_db6.max(tmp.abs());
            }
        }
        max_db6
    }

    fn integrator_error(&self, n3_real: usize) -> f64 {
        let at = &self.at[..n3_real];
        let b6 = &self.b[6][..n3_real];
        if self.settings.epsilon_global {
            let mut max_a = 0.0_f64;
            let mut max_b6 = 0.0_f64;
            for (a, b) in at.iter().zip(b6) {
                if a.is_finite() && b.is_finite() {
                    max_a = max_a.max(a.abs());
                    max_b6 = max_b6.max(b.abs());
                }
            }
            max_b6 / max_a
        } else {
            at.iter()
                .zip(b6)
                .map(|(a, b)| (b / a).abs())
                .filter(|e| e.is_finite())
                .fold(0.0, f64::max)
        }
    }

    fn advance_coordinates(&mut self, dt: f64, n3: usize) {
        let dt2 = dt * dt;
        for k in 0..n3 {
            let b = |m: usize| self.b[m][k];
            let mut x = self.x0[k];
            let mut csx = self.csx[k];
            compensated_add(&mut x, b(6) / 72.0 * dt2, &mut csx);
            compensated_add(&mut x, b(5) / 56.0 * dt2, &mut csx);
            compensated_add(&mut x, b(4) / 42.0 * dt2, &mut csx);
            compensated_add(&mut x, b(3) / 30.0 * dt2, &mut csx);
            compensated_add(&mut x, b(2) / 20.0 * dt2, &mut csx);
            compensated_add(&mut x, b(1) / 12.0 * dt2, &mut csx);
            compensated_add(&mut x, b(0) / 6.0 * dt2, &mut csx);
            compensated_add(&mut x, self.a0[k] / 2.0 * dt2, &mut csx);
            compensated_add(&mut x, self.v0[k] * dt, &mut csx);

            let mut v = self.v0[k];
            let mut csv = self.csv[k];
            compensated_add(&mut v, b(6) / 8.0 * dt, &mut csv);
            compensated_add(&mut v, b(5) / 7.0 * dt, &mut csv);
            compensated_add(&mut v, b(4) / 6.0 * dt, &mut csv);
            compensated_add(&mut v, b(3) / 5.0 * dt, &mut csv);
            compensated_add(&mut v, b(2) / 4.0 * dt, &mut csv);
            compensated_add(&mut v, b(1) / 3.0 * dt, &mut csv);
            compensated_add(&mut v, b(0) / 2.0 * dt, &mut csv);
            compensated_add(&mut v, self.a0[k] * dt, &mut csv);

            self.x0[k] = x;
            self.csx[k] = csx;
            self.v0[k] = v;
            self.csv[k] = csv;
        }
    }

    /// Seed `e` and `b` for a step `ratio` times the last accepted one.
    fn predict_next_step(&mut self, ratio: f64) {
        if ratio > 20.0 {
            // too far to extrapolate
            for coeffs in [&mut self.e, &mut self.b] {
                for v in coeffs.iter_mut() {
                    v.iter_mut().for_each(|c| *c = 0.0);
                }
            }
            return;
        }

        let q1 = ratio;
        let q2 = q1 * q1;
        let q3 = q1 * q2;
        let q4 = q2 * q2;
        let q5 = q2 * q3;
        let q6 = q3 * q3;
        let q7 = q3 * q4;

        for k in 0..self.br[0].len() {
            let [b0, b1, b2, b3, b4, b5, b6] = [0, 1, 2, 3, 4, 5, 6].map(|m| self.br[m][k]);
            let be: [f64; 7] = [0, 1, 2, 3, 4, 5, 6].map(|m| self.br[m][k] - self.er[m][k]);

            let e = [
                q1 * (b6 * 7.0 + b5 * 6.0 + b4 * 5.0 + b3 * 4.0 + b2 * 3.0 + b1 * 2.0 + b0),
                q2 * (b6 * 21.0 + b5 * 15.0 + b4 * 10.0 + b3 * 6.0 + b2 * 3.0 + b1),
                q3 * (b6 * 35.0 + b5 * 20.0 + b4 * 10.0 + b3 * 4.0 + b2),
                q4 * (b6 * 35.0 + b5 * 15.0 + b4 * 5.0 + b3),
                q5 * (b6 * 21.0 + b5 * 6.0 + b4),
                q6 * (b6 * 7.0 + b5),
                q7 * b6,
            ];
            for m in 0..7 {
                self.e[m][k] = e[m];
                self.b[m][k] = e[m] + be[m];
            }
        }
    }

    fn restore(&self, state: &mut SimState, t_beginning: f64) {
        for (i, p) in state.particles.as_mut_slice().iter_mut().enumerate() {
            for c in 0..3 {
                p.x[c] = self.x0[3 * i + c];
                p.v[c] = self.v0[3 * i + c];
            }
        }
        state.t = t_beginning;
    }

    fn cap_hit(&mut self, state: &mut SimState, t_beginning: f64, dt: f64) -> SimResult<Attempt> {
        self.restore(state, t_beginning);
        self.cap_hits += 1;
        self.consecutive_cap_hits += 1;
        warn!(
            "IAS15 predictor-corrector did not converge in {MAX_PREDICTOR_ITERATIONS} iterations \
             at t = {t_beginning:.6e}, dt = {dt:.3e}"
        );

        if self.consecutive_cap_hits >= MAX_CONSECUTIVE_CAP_HITS {
            return Err(non_convergence(
                t_beginning,
                dt,
                "predictor-corrector kept hitting its iteration cap",
            ));
        }
        let min_dt = self.settings.min_dt;
        let mut dt_new = dt * SAFETY_FACTOR;
        if dt_new.abs() < min_dt {
            if dt.abs() <= min_dt {
                return Err(non_convergence(
                    t_beginning,
                    dt,
                    "predictor-corrector did not converge at the minimum step",
                ));
            }
            dt_new = min_dt.copysign(dt);
        }

        state.dt = dt_new;
        if self.dt_last_success != 0.0 {
            self.predict_next_step(dt_new / self.dt_last_success);
        } else {
            for v in self.b.iter_mut().chain(self.e.iter_mut()) {
                v.iter_mut().for_each(|c| *c = 0.0);
            }
        }
        Ok(Attempt::Retry)
    }
}

fn non_convergence(t: f64, dt: f64, reason: &str) -> SimError {
    SimError::NonConvergence {
        integrator: "IAS15",
        t,
        dt,
        reason: reason.to_string(),
    }
}
