//! Time integrator of a compiled equation system
//!
//! Every local spectral mode carries the small dense matrices `M`
//! (terms under `dt`) and `L` (remaining left hand side terms). One step
//! evaluates all right hand sides from the current state, combines them
//! with the stored history and solves `(a0 M + b0 L) X = rhs` mode by mode.
use super::scheme::{MultistepImex, Scheme};
use super::state::{Clock, StopCondition};
use crate::domain::{Domain, Layout, SpectralEngine};
use crate::equation::{CompiledSystem, EquationSystem, Evaluator, Expr};
use crate::error::{Error, EquationClosureError, Result};
use crate::field::Field;
use indexmap::IndexMap;
use ndarray::{s, Array1, Array2, Array3, Axis, OwnedRepr, Zip};
use ndarray_linalg::{Factorize, LUFactorized, Solve};
use num_complex::Complex;
use std::collections::VecDeque;
use std::time::Instant;

type C64 = Complex<f64>;

/// State read by analysis tasks: fields and clock
#[derive(Debug, Clone)]
pub struct SolverState {
    /// One field per declared variable, in declaration order
    pub fields: IndexMap<String, Field>,
    /// Simulation clock
    pub clock: Clock,
    /// Stop thresholds
    pub stop: StopCondition,
}

/// Implicit matrices of one mode
#[derive(Debug, Clone)]
struct ModeOperator {
    k: [i64; 2],
    m: Array2<C64>,
    l: Array2<C64>,
}

/// Previous levels, most recent first
#[derive(Debug, Clone, Default)]
struct History {
    mx: VecDeque<Array3<C64>>,
    lx: VecDeque<Array3<C64>>,
    f: VecDeque<Array3<C64>>,
    dt: VecDeque<f64>,
}

impl History {
    fn push(&mut self, mx: Array3<C64>, lx: Array3<C64>, f: Array3<C64>, dt: f64, depth: usize) {
        self.mx.push_front(mx);
        self.lx.push_front(lx);
        self.f.push_front(f);
        self.dt.push_front(dt);
        self.mx.truncate(depth);
        self.lx.truncate(depth);
        self.f.truncate(depth);
        self.dt.truncate(depth);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// IMEX multistep solver
pub struct Solver<'a, E: SpectralEngine> {
    /// Domain context
    pub domain: &'a Domain<E>,
    /// Fields and clock
    pub state: SolverState,
    /// Abort on non-finite fields
    pub check_finite: bool,
    /// Truncate explicit terms with the 2/3 rule
    pub dealias: bool,
    symbols: EquationSystem,
    system: CompiledSystem,
    scheme: Scheme,
    operators: Vec<ModeOperator>,
    dealias_mask: Vec<bool>,
    history: History,
    factor_key: Option<[f64; 2]>,
    factors: Vec<LUFactorized<OwnedRepr<C64>>>,
    timer: Instant,
    wall_offset: f64,
}

impl<'a, E: SpectralEngine> Solver<'a, E> {
    /// Validate `system` and build a solver with zero initial fields
    ///
    /// # Errors
    /// System not closed.
    pub fn build(domain: &'a Domain<E>, system: &EquationSystem, scheme: Scheme) -> Result<Self> {
        let compiled = system.compile()?;
        let engine = &domain.engine;
        let fields: IndexMap<String, Field> = compiled
            .variables
            .iter()
            .map(|name| (name.clone(), domain.new_field(name)))
            .collect();

        let kx = engine.wavenumbers(0);
        let ky = engine.wavenumbers(1);
        let [nx, ny] = engine.global_shape();
        let nvar = compiled.variables.len();
        let mut operators = Vec::with_capacity(kx.len() * ky.len());
        let mut dealias_mask = Vec::with_capacity(kx.len() * ky.len());
        for &kxi in &kx {
            for &kyj in &ky {
                let k = [kxi, kyj];
                let mut m = Array2::<C64>::zeros((nvar, nvar));
                let mut l = Array2::<C64>::zeros((nvar, nvar));
                for row in 0..nvar {
                    // Closure guarantees exactly one equation per row and mode
                    let eq = compiled.equation_for(row, k).ok_or_else(|| {
                        EquationClosureError::PartitionGap {
                            variable: compiled.variables[row].clone(),
                            condition: format!("({}, {})", k[0], k[1]),
                        }
                    })?;
                    for term in &eq.lhs {
                        let col = compiled.variables.get_index_of(&term.var).ok_or_else(|| {
                            EquationClosureError::UnresolvedSymbol {
                                symbol: term.var.clone(),
                                location: eq.label.clone(),
                            }
                        })?;
                        if term.time_derivative {
                            m[[row, col]] += term.symbol(k);
                        } else {
                            l[[row, col]] += term.symbol(k);
                        }
                    }
                }
                operators.push(ModeOperator { k, m, l });
                dealias_mask.push(is_resolved(kxi, nx) && is_resolved(kyj, ny));
            }
        }

        Ok(Self {
            domain,
            state: SolverState {
                fields,
                clock: Clock::default(),
                stop: StopCondition::default(),
            },
            check_finite: true,
            dealias: false,
            symbols: system.clone(),
            system: compiled,
            scheme,
            operators,
            dealias_mask,
            history: History::default(),
            factor_key: None,
            factors: Vec::new(),
            timer: Instant::now(),
            wall_offset: 0.,
        })
    }

    /// Spectral engine
    pub fn engine(&self) -> &'a E {
        &self.domain.engine
    }

    /// Simulation clock
    pub fn clock(&self) -> &Clock {
        &self.state.clock
    }

    /// True while all stop thresholds are ahead
    pub fn ok(&self) -> bool {
        self.state.stop.ok(&self.state.clock)
    }

    /// Field of a variable
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.state.fields.get(name)
    }

    /// Mutable field of a variable. Keep `v` and `vhat` consistent.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.state.fields.get_mut(name)
    }

    /// Expression evaluator over the current state
    pub fn evaluator(&self) -> Evaluator<'_, E> {
        Evaluator::new(self.engine(), &self.state.fields)
    }

    /// Resolve a task expression against the declared symbols
    ///
    /// # Errors
    /// Unresolved names.
    pub fn expand(&self, expr: &Expr, location: &str) -> Result<Expr> {
        Ok(self.symbols.expand_checked(expr, location)?)
    }

    /// Reset multistep history, the next step uses the startup scheme
    pub fn reset_history(&mut self) {
        self.history.clear();
        self.factor_key = None;
    }

    /// Set clock after loading a state. Wall time restarts from zero.
    pub fn set_clock(&mut self, sim_time: f64, iteration: usize) {
        self.state.clock.sim_time = sim_time;
        self.state.clock.iteration = iteration;
        self.reset_history();
    }

    /// Restart the wall clock of the stop condition
    pub fn reset_wall_clock(&mut self) {
        self.timer = Instant::now();
        self.wall_offset = 0.;
        self.state.clock.wall_time = 0.;
    }

    /// Advance all fields by `dt`
    ///
    /// # Errors
    /// Right hand side not evaluable, singular mode, non-finite fields
    /// (if `check_finite`).
    pub fn step(&mut self, dt: f64) -> Result<()> {
        let nvar = self.system.variables.len();
        let coeff_shape = self.engine().local_shape(Layout::Coeff);
        let shape = (nvar, coeff_shape[0], coeff_shape[1]);

        // Explicit terms, all from the same snapshot
        let mut f = Array3::<C64>::zeros(shape);
        {
            let evaluator = self.evaluator();
            for eq in &self.system.equations {
                let rhs = evaluator
                    .eval_coeff(&eq.rhs)
                    .map_err(|reason| Error::Evaluation {
                        name: eq.label.clone(),
                        reason,
                    })?;
                let mut target = f.index_axis_mut(Axis(0), eq.variable);
                for (n, op) in self.operators.iter().enumerate() {
                    if eq.condition.matches(op.k) {
                        let idx = (n / coeff_shape[1], n % coeff_shape[1]);
                        target[idx] = rhs[idx];
                    }
                }
            }
        }
        if self.dealias {
            for (n, keep) in self.dealias_mask.iter().enumerate() {
                if !keep {
                    let (i, j) = (n / coeff_shape[1], n % coeff_shape[1]);
                    f.slice_mut(s![.., i, j]).fill(C64::new(0., 0.));
                }
            }
        }

        // Implicit terms of the current level
        let mut mx = Array3::<C64>::zeros(shape);
        let mut lx = Array3::<C64>::zeros(shape);
        for (n, op) in self.operators.iter().enumerate() {
            let (i, j) = (n / coeff_shape[1], n % coeff_shape[1]);
            let x = self.mode_vector(i, j);
            mx.slice_mut(s![.., i, j]).assign(&op.m.dot(&x));
            lx.slice_mut(s![.., i, j]).assign(&op.l.dot(&x));
        }
        let depth = self.scheme.steps();
        self.history.push(mx, lx, f, dt, depth);
        let levels = self.history.f.len();
        let timesteps: Vec<f64> = self.history.dt.iter().copied().collect();
        let coeff = self.scheme.coefficients(&timesteps, levels - 1);

        self.factorize(coeff.a[0], coeff.b[0])?;

        // Solve mode by mode
        let mut solution = Array3::<C64>::zeros(shape);
        for (n, (op, lu)) in self.operators.iter().zip(self.factors.iter()).enumerate() {
            let (i, j) = (n / coeff_shape[1], n % coeff_shape[1]);
            let mut rhs = Array1::<C64>::zeros(nvar);
            for lvl in 0..levels {
                let j_lvl = lvl + 1;
                let (a, b, c) = (coeff.a[j_lvl], coeff.b[j_lvl], coeff.c[j_lvl]);
                let mx = self.history.mx[lvl].slice(s![.., i, j]);
                let lx = self.history.lx[lvl].slice(s![.., i, j]);
                let fx = self.history.f[lvl].slice(s![.., i, j]);
                Zip::from(&mut rhs)
                    .and(&mx)
                    .and(&lx)
                    .and(&fx)
                    .for_each(|r, &m, &l, &e| *r += e * c - m * a - l * b);
            }
            let x = lu.solve(&rhs).map_err(|e| Error::LinearAlgebra {
                kx: op.k[0],
                ky: op.k[1],
                reason: e.to_string(),
            })?;
            solution.slice_mut(s![.., i, j]).assign(&x);
        }

        // Update fields in place
        let engine = self.engine();
        for (index, field) in self.state.fields.values_mut().enumerate() {
            field.vhat.assign(&solution.index_axis(Axis(0), index));
            field.backward(engine);
        }

        let clock = &mut self.state.clock;
        clock.sim_time += dt;
        clock.iteration += 1;
        let elapsed = self.wall_offset + self.timer.elapsed().as_secs_f64();
        clock.wall_time = self.domain.engine.max_all(elapsed);

        if self.check_finite {
            self.check_fields()?;
        }
        Ok(())
    }

    /// Fail on the first non-finite field
    ///
    /// # Errors
    /// `NumericalInstability` naming the field.
    pub fn check_fields(&self) -> Result<()> {
        let nvar = self.state.fields.len();
        let local = self
            .state
            .fields
            .values()
            .position(|field| !field.is_finite())
            .unwrap_or(nvar);
        // Lowest offending index over all processes
        #[allow(clippy::cast_precision_loss)]
        let global = -self.domain.engine.max_all(-(local as f64));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let first = global as usize;
        match self.state.fields.get_index(first) {
            Some((name, _)) => Err(Error::NumericalInstability {
                variable: name.clone(),
                iteration: self.state.clock.iteration,
                sim_time: self.state.clock.sim_time,
            }),
            None => Ok(()),
        }
    }

    fn mode_vector(&self, i: usize, j: usize) -> Array1<C64> {
        self.state.fields.values().map(|field| field.vhat[[i, j]]).collect()
    }

    /// LU factors of `a0 M + b0 L`, recomputed when the coefficients change
    fn factorize(&mut self, a0: f64, b0: f64) -> Result<()> {
        if self.factor_key == Some([a0, b0]) {
            return Ok(());
        }
        let mut factors = Vec::with_capacity(self.operators.len());
        for op in &self.operators {
            let matrix = &op.m * a0 + &op.l * b0;
            let lu = matrix.factorize().map_err(|e| Error::LinearAlgebra {
                kx: op.k[0],
                ky: op.k[1],
                reason: e.to_string(),
            })?;
            factors.push(lu);
        }
        self.factors = factors;
        self.factor_key = Some([a0, b0]);
        Ok(())
    }
}

/// 2/3 rule: keep |k| <= n/3
#[allow(clippy::cast_possible_wrap)]
fn is_resolved(k: i64, n: usize) -> bool {
    3 * k.abs() <= n as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Domain, FourierSpace};
    use crate::equation::expr::{constant, dt, dx, dy, sym};
    use crate::equation::Condition;
    use crate::solver::scheme::{Cnab2, Mcnab2, Sbdf1, Sbdf2};

    /// dt(u) - nu Lap(u) = 0
    fn heat(nu: f64) -> EquationSystem {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.declare_parameter("nu", nu).unwrap();
        system.add_equation(
            dt(sym("u")) - sym("nu") * (dx(dx(sym("u"))) + dy(dy(sym("u")))),
            constant(0.),
            Condition::All,
        );
        system
    }

    fn init_mode(solver: &mut Solver<FourierSpace>, kx: f64, ky: f64) {
        let engine = solver.engine();
        let x = engine.coords(0);
        let y = engine.coords(1);
        let field = solver.field_mut("u").unwrap();
        for ((i, j), v) in field.v.indexed_iter_mut() {
            *v = (kx * x[i]).sin() * (ky * y[j]).cos();
        }
        field.forward(engine);
    }

    /// Error at t = 1 of `dt(u) + lambda u = -mu u` with `u(0) = 1`
    fn decay_error(scheme: Scheme, lambda: f64, mu: f64, steps: usize) -> f64 {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.add_equation(
            dt(sym("u")) + lambda * sym("u"),
            -mu * sym("u"),
            Condition::All,
        );
        let domain = Domain::build(8, 8, None).unwrap();
        let mut solver = Solver::build(&domain, &system, scheme).unwrap();
        let engine = solver.engine();
        let field = solver.field_mut("u").unwrap();
        field.v.fill(1.);
        field.forward(engine);
        let dt = 1. / steps as f64;
        for _ in 0..steps {
            solver.step(dt).unwrap();
        }
        let exact = (-(lambda + mu)).exp();
        solver
            .field("u")
            .unwrap()
            .v
            .iter()
            .map(|v| (v - exact).abs())
            .fold(0., f64::max)
    }

    #[test]
    fn test_second_order_convergence() {
        let schemes: [Scheme; 3] = [Mcnab2.into(), Cnab2.into(), Sbdf2.into()];
        for scheme in schemes {
            // Explicit only, and split between implicit and explicit part
            for (lambda, mu) in [(0., 1.), (1., 0.5)] {
                let ratio = decay_error(scheme, lambda, mu, 40) / decay_error(scheme, lambda, mu, 80);
                assert!(
                    (3.5..4.6).contains(&ratio),
                    "{:?} (lambda {}, mu {}): error ratio {}",
                    scheme,
                    lambda,
                    mu,
                    ratio
                );
            }
        }
    }

    #[test]
    fn test_first_order_convergence_sbdf1() {
        let ratio = decay_error(Sbdf1.into(), 1., 0.5, 40) / decay_error(Sbdf1.into(), 1., 0.5, 80);
        assert!((1.7..2.3).contains(&ratio), "error ratio {}", ratio);
    }

    #[test]
    fn test_clock_advances() {
        let domain = Domain::build(8, 8, None).unwrap();
        let mut solver = Solver::build(&domain, &heat(0.1), Mcnab2.into()).unwrap();
        let dt = 1e-3;
        for _ in 0..7 {
            solver.step(dt).unwrap();
        }
        assert_eq!(solver.clock().iteration, 7);
        assert!((solver.clock().sim_time - 7. * dt).abs() < 1e-14);
    }

    #[test]
    fn test_heat_decay() {
        let nu = 0.5;
        let dt = 1e-3;
        let domain = Domain::build(16, 16, None).unwrap();
        let mut solver = Solver::build(&domain, &heat(nu), Mcnab2.into()).unwrap();
        init_mode(&mut solver, 1., 2.);
        let u0 = solver.field("u").unwrap().v.clone();
        for _ in 0..100 {
            solver.step(dt).unwrap();
        }
        let decay = (-nu * 5. * 0.1_f64).exp();
        let u = &solver.field("u").unwrap().v;
        for (a, b) in u.iter().zip(u0.iter()) {
            assert!((a - decay * b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_explicit_forcing_sbdf1() {
        // dt(u) = 1 -> u = t
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.add_equation(dt(sym("u")), constant(1.), Condition::All);
        let domain = Domain::build(8, 8, None).unwrap();
        let mut solver = Solver::build(&domain, &system, Sbdf1.into()).unwrap();
        for _ in 0..10 {
            solver.step(0.1).unwrap();
        }
        for v in solver.field("u").unwrap().v.iter() {
            assert!((v - 1.).abs() < 1e-10);
        }
    }

    #[test]
    fn test_non_finite_aborts() {
        // dt(u) = u^2 blows up with a huge initial value
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.add_equation(dt(sym("u")), sym("u").powi(2), Condition::All);
        let domain = Domain::build(8, 8, None).unwrap();
        let mut solver = Solver::build(&domain, &system, Sbdf1.into()).unwrap();
        let engine = solver.engine();
        let field = solver.field_mut("u").unwrap();
        field.v.fill(1e200);
        field.forward(engine);
        let err = solver.step(1.).unwrap_err();
        assert!(matches!(err, Error::NumericalInstability { ref variable, iteration: 1, .. } if variable == "u"));
    }

    #[test]
    fn test_non_finite_unchecked() {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.add_equation(dt(sym("u")), sym("u").powi(2), Condition::All);
        let domain = Domain::build(8, 8, None).unwrap();
        let mut solver = Solver::build(&domain, &system, Sbdf1.into()).unwrap();
        solver.check_finite = false;
        let engine = solver.engine();
        let field = solver.field_mut("u").unwrap();
        field.v.fill(1e200);
        field.forward(engine);
        assert!(solver.step(1.).is_ok());
        assert!(!solver.field("u").unwrap().is_finite());
    }

    #[test]
    fn test_unclosed_system_rejected() {
        let mut system = heat(0.1);
        system.declare_variable("p").unwrap();
        let domain = Domain::build(8, 8, None).unwrap();
        assert!(matches!(
            Solver::build(&domain, &system, Mcnab2.into()),
            Err(Error::Closure(EquationClosureError::PartitionGap { .. }))
        ));
    }
}
