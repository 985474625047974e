//! # Two-dimensional viscoelastic turbulence
//! Kolmogorov flow of an Oldroyd-B fluid on the doubly periodic square
//! `[0, 2pi)^2`.
//!
//! The conformation tensor is carried in Cholesky form `sigma = L L^T`,
//! `L = [[U11, 0], [U12, U22]]`, with logarithmic diagonal
//! `U11 = exp(lU11)`, `U22 = exp(lU22)`. Any finite state then gives a
//! positive-definite `sigma`.
//!
//! Variables: `u`, `v`, `p`, `lU11`, `U12`, `lU22`.
//! Parameters: `eta` (viscosity ratio), `Re`, `Wi`, `forcing`.
//!
//! Run with a configuration file:
//! ```ignore
//! use viscoturb::config::Config;
//! use viscoturb::domain::Domain;
//! use viscoturb::viscoelastic::run;
//!
//! let config = Config::load("run.yaml")?;
//! let domain = Domain::build(config.params.nx, config.params.ny, None)?;
//! let summary = run(&config, &domain)?;
//! ```
use crate::analysis::{AnalysisPipeline, Cadence, HandlerMode, MergeOutcome, TaskLayout};
use crate::config::{Config, Params};
use crate::domain::{Domain, SpectralEngine};
use crate::equation::expr::{call, constant, cos, dt, dx, dy, exp, integ, sym, y};
use crate::equation::{Condition, EquationSystem, Expr};
use crate::error::{EquationClosureError, MergeError, OutputError, Result};
use crate::field::{apply_random_disturbance, Field};
use crate::solver::{Clock, Solver, StopCondition};
use crate::{integrate, Simulation};
use std::path::PathBuf;
use std::time::Instant;

/// State variables in solver order
pub const VARIABLES: [&str; 6] = ["u", "v", "p", "lU11", "U12", "lU22"];

/// Handler names below `run.data_dir`
pub const HANDLERS: [&str; 3] = ["checkpoints", "snapshots", "timeseries"];

/// Equation system of the viscoelastic Kolmogorov flow
///
/// # Errors
/// Duplicate declarations or an unclosed system.
pub fn build_system(params: &Params) -> Result<EquationSystem, EquationClosureError> {
    let mut system = EquationSystem::new();
    for var in VARIABLES {
        system.declare_variable(var)?;
    }
    system.declare_parameter("eta", params.eta)?;
    system.declare_parameter("Re", params.re)?;
    system.declare_parameter("Wi", params.wi)?;
    system.declare_parameter("forcing", params.forcing)?;

    // Conformation tensor
    system.declare_substitution("U11", exp(sym("lU11")))?;
    system.declare_substitution("U22", exp(sym("lU22")))?;
    system.declare_substitution("sigma11", sym("U11").powi(2))?;
    system.declare_substitution("sigma12", sym("U11") * sym("U12"))?;
    system.declare_substitution("sigma22", sym("U12").powi(2) + sym("U22").powi(2))?;

    system.declare_function("Lap", &["A"], dx(dx(sym("A"))) + dy(dy(sym("A"))))?;
    system.declare_substitution("Div_sigma_x", dx(sym("sigma11")) + dy(sym("sigma12")))?;
    system.declare_substitution("Div_sigma_y", dx(sym("sigma12")) + dy(sym("sigma22")))?;

    // Diagnostics
    system.declare_substitution("vorticity", dx(sym("v")) - dy(sym("u")))?;
    system.declare_substitution(
        "Ekin",
        0.5 * integ(sym("u").powi(2) + sym("v").powi(2)),
    )?;
    system.declare_substitution("Sigma", integ(sym("sigma11") + sym("sigma22")))?;

    let (u, v, p) = (sym("u"), sym("v"), sym("p"));
    let nu = || 1. / (sym("Re") * (1. + sym("eta")));
    let elastic = || 2. * sym("eta") / (sym("Wi") * sym("Re") * (1. + sym("eta")));
    let advect = |q: &Expr| sym("u") * dx(q.clone()) + sym("v") * dy(q.clone());
    let lap = |q: &Expr| call("Lap", vec![q.clone()]);
    let wi = || sym("Wi");

    // Momentum
    system
        .add_equation(
            dt(u.clone()) - nu() * lap(&u) + dx(p.clone()),
            elastic() * sym("Div_sigma_x") - advect(&u) - sym("forcing") * cos(y()) / sym("Re"),
            Condition::All,
        )
        .labeled("x-momentum");
    system
        .add_equation(
            dt(v.clone()) - nu() * lap(&v) + dy(p.clone()),
            elastic() * sym("Div_sigma_y") - advect(&v),
            Condition::All,
        )
        .labeled("y-momentum");

    // Incompressibility, the pressure gauge fixes the mean mode
    system
        .add_equation(dx(u.clone()) + dy(v.clone()), constant(0.), Condition::NonzeroMode)
        .closing("p")
        .labeled("continuity");
    system
        .add_equation(p, constant(0.), Condition::ZeroMode)
        .closing("p")
        .labeled("pressure gauge");

    // Conformation
    let (l11, u12, l22) = (sym("lU11"), sym("U12"), sym("lU22"));
    system
        .add_equation(
            dt(l11.clone()) - dx(u.clone()),
            -advect(&l11) + u12.clone() * dy(u.clone()) * exp(-l11.clone())
                - (1. - exp(-2. * l11.clone())) / wi(),
            Condition::All,
        )
        .labeled("lU11");
    system
        .add_equation(
            dt(u12.clone()) - dy(v.clone()),
            -advect(&u12)
                + exp(-l11.clone()) * (exp(2. * l22.clone()) - u12.clone().powi(2)) * dy(u.clone())
                + exp(-l11.clone()) * dx(v.clone())
                + u12.clone() * dy(v.clone())
                - u12.clone() * (1. + exp(-2. * l11.clone())) / wi(),
            Condition::All,
        )
        .labeled("U12");
    system
        .add_equation(
            dt(l22.clone()) - dy(v.clone()),
            -advect(&l22) + exp(l11 - 2. * l22.clone()) * u12 * dx(v)
                - (1. - exp(-2. * l22)) / wi(),
            Condition::All,
        )
        .labeled("lU22");

    system.validate()?;
    Ok(system)
}

/// Register the `checkpoints`, `snapshots` and `timeseries` handlers below
/// `config.run.data_dir`
///
/// # Errors
/// Old output cannot be removed or listed.
pub fn add_analysis<E: SpectralEngine + ?Sized>(
    pipeline: &mut AnalysisPipeline,
    engine: &E,
    config: &Config,
    mode: HandlerMode,
) -> Result<(), OutputError> {
    let data_dir = &config.run.data_dir;
    let analysis = &config.analysis;

    let checkpoints = pipeline.add_handler(
        engine,
        data_dir.join("checkpoints"),
        Cadence::wall_time(analysis.checkpoint_wall_dt),
        analysis.checkpoint_max_writes,
        mode,
    )?;
    for var in VARIABLES {
        checkpoints.add_task(sym(var), var, TaskLayout::Coeff);
    }

    let snapshots = pipeline.add_handler(
        engine,
        data_dir.join("snapshots"),
        Cadence::sim_time(analysis.snapshot_sim_dt),
        analysis.snapshot_max_writes,
        mode,
    )?;
    for name in ["vorticity", "u", "v", "sigma11", "sigma12", "sigma22"] {
        snapshots.add_task(sym(name), name, TaskLayout::Grid);
    }
    for name in ["sigma11", "sigma12", "sigma22"] {
        snapshots.add_task(sym(name), &format!("{}_kspace", name), TaskLayout::Coeff);
    }

    pipeline
        .add_handler(
            engine,
            data_dir.join("timeseries"),
            Cadence::iteration(analysis.timeseries_iter),
            analysis.timeseries_max_writes,
            mode,
        )?
        .add_task(sym("Ekin"), "Ekin", TaskLayout::Scalar)
        .add_task(sym("Sigma"), "Sigma", TaskLayout::Scalar);
    Ok(())
}

/// Add a divergence free random disturbance of amplitude `noise` to the
/// velocity. The streamfunction `psi` is uniform noise, `u = dy(psi)` and
/// `v = -dx(psi)`.
pub fn apply_initial_disturbance<E: SpectralEngine>(solver: &mut Solver<E>, noise: f64, seed: u64) {
    if noise <= 0. {
        return;
    }
    let engine = solver.engine();
    let mut psi = Field::new("psi", engine);
    apply_random_disturbance(engine, &mut psi, noise, seed);
    let u_hat = engine.gradient(&psi.vhat, [0, 1]);
    let v_hat = engine.gradient(&psi.vhat, [1, 0]).mapv(|c| -c);
    if let Some(u) = solver.field_mut("u") {
        u.vhat += &u_hat;
        u.backward(engine);
    }
    if let Some(v) = solver.field_mut("v") {
        v.vhat += &v_hat;
        v.backward(engine);
    }
}

/// Outcome of [`run`]
#[derive(Debug)]
pub struct RunSummary {
    /// Clock at the end of the time loop
    pub clock: Clock,
    /// Merge result of every handler (empty on ranks other than 0)
    pub merges: Vec<(PathBuf, std::result::Result<MergeOutcome, MergeError>)>,
}

impl RunSummary {
    /// Number of handlers whose merge failed
    pub fn failed_merges(&self) -> usize {
        self.merges.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Build the solver, restart or disturb the initial state, run the time
/// loop and merge the output of every handler.
///
/// Output is merged also when the time loop stops with an error, the
/// error is returned afterwards.
///
/// # Errors
/// Unclosed equations, unreadable restart file, unresolved tasks, numerical
/// instability.
pub fn run<E: SpectralEngine>(config: &Config, domain: &Domain<E>) -> Result<RunSummary> {
    let engine = &domain.engine;
    let system = build_system(&config.params)?;
    let mut solver = Solver::build(domain, &system, config.run.scheme.into())?;
    solver.check_finite = config.run.check_finite;
    solver.dealias = config.run.dealias;
    solver.state.stop = StopCondition::from_config(&config.run);

    let mode = match &config.run.restart {
        Some(path) => {
            solver.load_checkpoint(path)?;
            HandlerMode::Append
        }
        None => {
            apply_initial_disturbance(&mut solver, config.init.noise, config.init.seed);
            HandlerMode::Overwrite
        }
    };

    let mut pipeline = AnalysisPipeline::new();
    add_analysis(&mut pipeline, engine, config, mode)?;
    pipeline.check(&solver)?;

    if engine.rank() == 0 {
        tracing::info!(
            "nx = {}, ny = {}, Re = {:e}, Wi = {:e}, eta = {:e}, dt = {:e}, scheme = {:?}",
            config.params.nx,
            config.params.ny,
            config.params.re,
            config.params.wi,
            config.params.eta,
            config.run.dt,
            config.run.scheme,
        );
    }
    solver.reset_wall_clock();
    let mut sim = Simulation::new(solver, pipeline, config.run.dt);
    let result = integrate(&mut sim, config.run.log_cadence);
    if let Err(e) = &result {
        tracing::error!("time loop aborted: {}", e);
    }

    let timer = Instant::now();
    let merges = sim.pipeline.merge(engine);
    if engine.rank() == 0 {
        tracing::info!("merge time: {:.2} sec", timer.elapsed().as_secs_f64());
    }
    result?;
    Ok(RunSummary {
        clock: *sim.solver.clock(),
        merges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::merged_path;
    use crate::equation::Evaluator;
    use crate::io::read_array;
    use indexmap::IndexMap;
    use ndarray::Array1;
    use proptest::prelude::*;

    fn params(forcing: f64) -> Params {
        Params {
            nx: 16,
            ny: 16,
            re: 10.,
            wi: 1.,
            eta: 0.1,
            forcing,
        }
    }

    fn config(dir: &std::path::Path, stop_iteration: usize) -> Config {
        let yaml = format!(
            "params: {{nx: 16, ny: 16, Re: 10.0, Wi: 1.0, eta: 0.1}}\n\
             run: {{dt: 1.0e-3, stop_iteration: {}, data_dir: {:?}, log_cadence: 0}}\n\
             init: {{noise: 1.0e-3, seed: 7}}\n\
             analysis: {{checkpoint_wall_dt: 1.0e-9, timeseries_iter: 1}}\n",
            stop_iteration,
            dir.display().to_string(),
        );
        Config::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn test_system_is_closed() {
        let system = build_system(&params(1.)).unwrap();
        let compiled = system.compile().unwrap();
        assert_eq!(compiled.variables.len(), 6);
        let p = compiled.variables.get_index_of("p").unwrap();
        assert_eq!(compiled.equation_for(p, [0, 0]).unwrap().label, "pressure gauge");
        assert_eq!(compiled.equation_for(p, [3, 1]).unwrap().label, "continuity");
    }

    #[test]
    fn test_ekin_vanishes_at_rest() {
        let domain = Domain::build(16, 16, None).unwrap();
        let system = build_system(&params(0.)).unwrap();
        let solver = Solver::build(&domain, &system, crate::solver::Mcnab2.into()).unwrap();
        let ekin = solver.expand(&sym("Ekin"), "Ekin").unwrap();
        match solver.evaluator().eval(&ekin).unwrap() {
            crate::equation::Value::Scalar(e) => assert!(e.abs() < 1e-14),
            crate::equation::Value::Grid(_) => panic!("expected scalar"),
        }
    }

    #[test]
    fn test_disturbance_is_divergence_free() {
        let domain = Domain::build(16, 16, None).unwrap();
        let system = build_system(&params(1.)).unwrap();
        let mut solver = Solver::build(&domain, &system, crate::solver::Mcnab2.into()).unwrap();
        apply_initial_disturbance(&mut solver, 1e-2, 3);
        let u = solver.field("u").unwrap();
        let v = solver.field("v").unwrap();
        assert!(u.v.iter().any(|x| x.abs() > 0.));
        let div = domain.engine.gradient(&u.vhat, [1, 0]) + domain.engine.gradient(&v.vhat, [0, 1]);
        assert!(div.iter().all(|c| c.norm() < 1e-12));
    }

    fn stress_at(l11: f64, u12: f64, l22: f64) -> [f64; 3] {
        let domain = Domain::build(4, 4, None).unwrap();
        let system = build_system(&params(1.)).unwrap();
        let mut fields: IndexMap<String, Field> = IndexMap::new();
        for (name, value) in [("lU11", l11), ("U12", u12), ("lU22", l22)] {
            let mut field = domain.new_field(name);
            field.v.fill(value);
            fields.insert(name.to_owned(), field);
        }
        let evaluator = Evaluator::new(&domain.engine, &fields);
        let mut sigma = [0.; 3];
        for (i, name) in ["sigma11", "sigma12", "sigma22"].iter().enumerate() {
            let expr = system.expand_checked(&sym(name), name).unwrap();
            let grid = evaluator.eval(&expr).unwrap().into_grid([4, 4]);
            sigma[i] = grid[[1, 2]];
        }
        sigma
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn prop_stress_is_positive_definite(
            l11 in -5.0_f64..5.0,
            u12 in -10.0_f64..10.0,
            l22 in -5.0_f64..5.0,
        ) {
            let [s11, s12, s22] = stress_at(l11, u12, l22);
            prop_assert!(s11 + s22 > 0.);
            prop_assert!(s11 * s22 - s12 * s12 > 0.);
        }
    }

    #[test]
    fn test_run_stops_at_iteration_limit() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 5);
        let domain = Domain::build(16, 16, None).unwrap();
        let summary = run(&config, &domain).unwrap();
        assert_eq!(summary.clock.iteration, 5);
        assert_eq!(summary.merges.len(), 3);
        assert_eq!(summary.failed_merges(), 0);

        let file = hdf5::File::open(merged_path(dir.path().join("timeseries"))).unwrap();
        let iteration: Array1<u64> = read_array(&file, "iteration").unwrap();
        assert_eq!(iteration.to_vec(), vec![0, 1, 2, 3, 4, 5]);
        let sigma: Array1<f64> = read_array(&file, "tasks/Sigma").unwrap();
        // Relaxed state: sigma = identity
        let area = (2. * std::f64::consts::PI).powi(2);
        assert!((sigma[0] - 2. * area).abs() < 1e-8);
    }

    #[test]
    fn test_restart_continues_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let domain = Domain::build(16, 16, None).unwrap();
        let first = run(&config(dir.path(), 3), &domain).unwrap();
        assert_eq!(first.clock.iteration, 3);

        let mut config = config(dir.path(), 6);
        config.run.restart = Some(merged_path(dir.path().join("checkpoints")));
        let second = run(&config, &domain).unwrap();
        assert_eq!(second.clock.iteration, 6);
        assert_eq!(second.failed_merges(), 0);

        let file = hdf5::File::open(merged_path(dir.path().join("timeseries"))).unwrap();
        let iteration: Array1<u64> = read_array(&file, "iteration").unwrap();
        assert_eq!(iteration.first(), Some(&0));
        assert_eq!(iteration.last(), Some(&6));
    }

    #[test]
    fn test_unforced_rest_stays_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 8);
        config.params.forcing = 0.;
        config.init.noise = 0.;
        let domain = Domain::build(16, 16, None).unwrap();
        let summary = run(&config, &domain).unwrap();
        assert_eq!(summary.failed_merges(), 0);

        let file = hdf5::File::open(merged_path(dir.path().join("timeseries"))).unwrap();
        let ekin: Array1<f64> = read_array(&file, "tasks/Ekin").unwrap();
        assert_eq!(ekin.len(), 9);
        assert!(ekin.iter().all(|e| e.abs() < 1e-20));
    }
}
