//! Interpreter of expanded expressions
//!
//! Every node evaluates to a local physical block or a global scalar.
//! Products and functions are pointwise on the grid, derivatives go
//! through spectral space.
use super::expr::{Expr, Operator};
use crate::domain::{Layout, SpectralEngine};
use crate::field::{integrate_grid, Field};
use indexmap::IndexMap;
use ndarray::{Array2, Zip};
use num_complex::Complex;

/// Result of an evaluation
#[derive(Debug, Clone)]
pub enum Value {
    /// Same value on every grid point (and every process)
    Scalar(f64),
    /// Local physical block
    Grid(Array2<f64>),
}

impl Value {
    /// Physical block, scalars are broadcast to `shape`
    pub fn into_grid(self, shape: [usize; 2]) -> Array2<f64> {
        match self {
            Value::Scalar(s) => Array2::from_elem(shape, s),
            Value::Grid(g) => g,
        }
    }

    fn combine(self, other: Value, f: impl Fn(f64, f64) -> f64 + Sync + Send) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(a, b)),
            (Value::Grid(mut a), Value::Scalar(b)) => {
                a.mapv_inplace(|x| f(x, b));
                Value::Grid(a)
            }
            (Value::Scalar(a), Value::Grid(mut b)) => {
                b.mapv_inplace(|x| f(a, x));
                Value::Grid(b)
            }
            (Value::Grid(mut a), Value::Grid(b)) => {
                Zip::from(&mut a).and(&b).par_for_each(|x, &y| *x = f(*x, y));
                Value::Grid(a)
            }
        }
    }

    fn map(self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(s) => Value::Scalar(f(s)),
            Value::Grid(mut g) => {
                g.mapv_inplace(f);
                Value::Grid(g)
            }
        }
    }
}

/// Evaluates expressions against one snapshot of the state
pub struct Evaluator<'a, E: ?Sized> {
    engine: &'a E,
    fields: &'a IndexMap<String, Field>,
}

impl<'a, E: SpectralEngine + ?Sized> Evaluator<'a, E> {
    /// Evaluator reading `fields`
    pub fn new(engine: &'a E, fields: &'a IndexMap<String, Field>) -> Self {
        Self { engine, fields }
    }

    fn grid_shape(&self) -> [usize; 2] {
        self.engine.local_shape(Layout::Grid)
    }

    fn field(&self, name: &str) -> Result<&'a Field, String> {
        self.fields
            .get(name)
            .ok_or_else(|| format!("no field `{}`", name))
    }

    /// Evaluate into a physical block or scalar
    ///
    /// # Errors
    /// Unexpanded names, time derivatives, unknown fields.
    pub fn eval(&self, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::Const(c) => Ok(Value::Scalar(*c)),
            Expr::Var(name) => Ok(Value::Grid(self.field(name)?.v.clone())),
            Expr::Coord(axis) => {
                let coords = self.engine.coords(*axis);
                let mut grid = Array2::zeros(self.grid_shape());
                for ((i, j), v) in grid.indexed_iter_mut() {
                    *v = coords[if *axis == 0 { i } else { j }];
                }
                Ok(Value::Grid(grid))
            }
            Expr::Add(terms) => {
                let mut sum = Value::Scalar(0.);
                for term in terms {
                    sum = sum.combine(self.eval(term)?, |a, b| a + b);
                }
                Ok(sum)
            }
            Expr::Mul(factors) => {
                let mut product = Value::Scalar(1.);
                for factor in factors {
                    product = product.combine(self.eval(factor)?, |a, b| a * b);
                }
                Ok(product)
            }
            Expr::Pow(base, n) => {
                let n = *n;
                Ok(self.eval(base)?.map(|x| x.powi(n)))
            }
            Expr::Apply(op, operand) => match op {
                Operator::Dx | Operator::Dy => self.eval_derivative(expr),
                Operator::Exp => Ok(self.eval(operand)?.map(f64::exp)),
                Operator::Cos => Ok(self.eval(operand)?.map(f64::cos)),
                Operator::Sin => Ok(self.eval(operand)?.map(f64::sin)),
                Operator::Integrate => Ok(Value::Scalar(match self.eval(operand)? {
                    Value::Scalar(s) => s * 4. * std::f64::consts::PI.powi(2),
                    Value::Grid(g) => integrate_grid(self.engine, &g),
                })),
                Operator::Dt => Err(format!("time derivative `{}` cannot be evaluated", expr)),
            },
            Expr::Symbol(name) | Expr::Call(name, _) => Err(format!("unexpanded name `{}`", name)),
            Expr::Arg(i) => Err(format!("free argument ${}", i)),
        }
    }

    /// Evaluate into spectral coefficients
    ///
    /// # Errors
    /// See [`Evaluator::eval`].
    pub fn eval_coeff(&self, expr: &Expr) -> Result<Array2<Complex<f64>>, String> {
        if let Expr::Var(name) = expr {
            return Ok(self.field(name)?.vhat.clone());
        }
        let grid = self.eval(expr)?.into_grid(self.grid_shape());
        let mut vhat = Array2::zeros(self.engine.local_shape(Layout::Coeff));
        self.engine.forward(&grid, &mut vhat);
        Ok(vhat)
    }

    /// Nested dx/dy around one operand are applied in a single spectral
    /// multiplication.
    fn eval_derivative(&self, expr: &Expr) -> Result<Value, String> {
        let mut order = [0, 0];
        let mut inner = expr;
        while let Expr::Apply(op @ (Operator::Dx | Operator::Dy), operand) = inner {
            order[usize::from(*op == Operator::Dy)] += 1;
            inner = operand.as_ref();
        }
        let vhat = match inner {
            Expr::Var(name) => self.engine.gradient(&self.field(name)?.vhat, order),
            _ => match self.eval(inner)? {
                Value::Scalar(_) => return Ok(Value::Scalar(0.)),
                Value::Grid(grid) => {
                    let mut vhat = Array2::zeros(self.engine.local_shape(Layout::Coeff));
                    self.engine.forward(&grid, &mut vhat);
                    self.engine.gradient(&vhat, order)
                }
            },
        };
        let mut grid = Array2::zeros(self.grid_shape());
        self.engine.backward(&vhat, &mut grid);
        Ok(Value::Grid(grid))
    }
}
