use gravsim::{bench_gravity, bench_integrators};
use gravsim::{IntegrationStatus, Scenario, ScenarioConfig, Simulation};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gravsim", about = "Gravitational N-body integrator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Integrate a YAML scenario
    Run {
        /// Scenario file; bare names are looked up in the bundled `scenarios/`
        #[arg(default_value = "two_body.yaml")]
        file_name: String,
        /// Write a snapshot of the final state here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Continue from a snapshot
    Resume {
        file_name: PathBuf,
        #[arg(long)]
        tmax: f64,
        /// Write a snapshot of the final state here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Time the gravity modes and the integrators
    Bench {
        #[arg(long, default_value_t = 10)]
        planets: usize,
        #[arg(long, default_value_t = 100.0)]
        tmax: f64,
    },
}

// resolve here to keep main clean
fn scenario_path(file_name: &str) -> PathBuf {
    let direct = PathBuf::from(file_name);
    if direct.exists() {
        return direct;
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name)
}

fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = scenario_path(file_name);
    let scenario_cfg = ScenarioConfig::from_path(&config_path)
        .with_context(|| format!("failed to load scenario {}", config_path.display()))?;
    Ok(scenario_cfg)
}

fn save(sim: &mut Simulation, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    sim.save_snapshot(BufWriter::new(file))
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    info!("snapshot written to {}", path.display());
    Ok(())
}

fn report(sim: &Simulation, status: IntegrationStatus, e0: f64) {
    let e1 = sim.total_energy();
    let drift = if e0 != 0.0 { ((e1 - e0) / e0).abs() } else { (e1 - e0).abs() };
    println!("status:            {status:?}");
    println!("t:                 {:.9e}", sim.state.t);
    println!("steps:             {}", sim.state.steps_done);
    println!("particles:         {}", sim.state.n_real());
    println!("energy drift:      {drift:.3e}");
    println!("collisions:        {}", sim.state.collisions_nlog);
    if sim.state.megno.n > 0 || sim.state.particles.n_var() > 0 {
        println!("MEGNO:             {:.6}", sim.calculate_megno());
        println!("Lyapunov:          {:.6e}", sim.calculate_lyapunov());
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Run { file_name, snapshot } => {
            let scenario_cfg = load_scenario_from_yaml(&file_name)?;
            let mut scenario = Scenario::build(scenario_cfg).context("invalid scenario")?;
            let e0 = scenario.simulation.total_energy();
            let status = scenario.run().context("integration failed")?;
            report(&scenario.simulation, status, e0);
            if let Some(path) = snapshot {
                save(&mut scenario.simulation, &path)?;
            }
        }
        Command::Resume { file_name, tmax, snapshot } => {
            let file = File::open(&file_name)
                .with_context(|| format!("cannot open {}", file_name.display()))?;
            let mut sim = Simulation::load_snapshot(BufReader::new(file))
                .with_context(|| format!("failed to read snapshot {}", file_name.display()))?;
            let e0 = sim.total_energy();
            let status = sim.integrate(Some(tmax)).context("integration failed")?;
            report(&sim, status, e0);
            if let Some(path) = snapshot {
                save(&mut sim, &path)?;
            }
        }
        Command::Bench { planets, tmax } => {
            bench_gravity();
            bench_integrators(planets, tmax)?;
        }
    }

    Ok(())
}
