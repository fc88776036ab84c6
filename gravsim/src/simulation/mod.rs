pub mod states;
pub mod boundary;
pub mod barnes_hut;
pub mod forces;
pub mod collision;
pub mod hooks;
pub mod integrator;
pub mod megno;
pub mod world;
pub mod engine;
pub mod orbit;
pub mod snapshot;
pub mod scenario;
