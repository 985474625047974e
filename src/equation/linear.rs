//! Left hand sides as linear combinations of differentiated variables
use super::expr::{Expr, Operator};
use num_complex::Complex;

/// `coeff * dt^t dx^ox dy^oy (var)`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTerm {
    /// Variable
    pub var: String,
    /// Term is under a time derivative
    pub time_derivative: bool,
    /// Derivative orders along x and y
    pub order: [usize; 2],
    /// Constant coefficient
    pub coeff: f64,
}

impl LinearTerm {
    /// Spectral symbol of the term for wavenumbers `k`
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn symbol(&self, k: [i64; 2]) -> Complex<f64> {
        let ikx = Complex::new(0., k[0] as f64);
        let iky = Complex::new(0., k[1] as f64);
        ikx.powi(self.order[0] as i32) * iky.powi(self.order[1] as i32) * self.coeff
    }
}

/// Linear form: constant plus linear terms
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearForm {
    /// Inhomogeneous part
    pub constant: f64,
    /// Terms
    pub terms: Vec<LinearTerm>,
}

impl LinearForm {
    fn constant(value: f64) -> Self {
        Self {
            constant: value,
            terms: vec![],
        }
    }

    fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    fn scale(mut self, factor: f64) -> Self {
        self.constant *= factor;
        for term in &mut self.terms {
            term.coeff *= factor;
        }
        self
    }

    /// Variables that appear under a time derivative, in order of appearance
    pub fn time_derivative_vars(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = vec![];
        for term in self.terms.iter().filter(|t| t.time_derivative) {
            if !vars.contains(&term.var.as_str()) {
                vars.push(&term.var);
            }
        }
        vars
    }
}

/// Decompose an expanded expression into a linear form.
///
/// # Errors
/// Description of the first term that is not linear with constant
/// coefficients.
pub fn linearize(expr: &Expr) -> Result<LinearForm, String> {
    match expr {
        Expr::Const(c) => Ok(LinearForm::constant(*c)),
        Expr::Var(name) => Ok(LinearForm {
            constant: 0.,
            terms: vec![LinearTerm {
                var: name.clone(),
                time_derivative: false,
                order: [0, 0],
                coeff: 1.,
            }],
        }),
        Expr::Add(terms) => {
            let mut sum = LinearForm::default();
            for term in terms {
                let form = linearize(term)?;
                sum.constant += form.constant;
                sum.terms.extend(form.terms);
            }
            Ok(sum)
        }
        Expr::Mul(factors) => {
            let mut scale = 1.;
            let mut linear: Option<LinearForm> = None;
            for factor in factors {
                let form = linearize(factor)?;
                if form.is_constant() {
                    scale *= form.constant;
                } else if linear.is_none() {
                    linear = Some(form);
                } else {
                    return Err(format!("product of state variables in `{}`", expr));
                }
            }
            Ok(match linear {
                Some(form) if form.constant == 0. => form.scale(scale),
                Some(_) => return Err(format!("affine factor in product `{}`", expr)),
                None => LinearForm::constant(scale),
            })
        }
        Expr::Pow(base, n) => {
            let form = linearize(base)?;
            if form.is_constant() {
                Ok(LinearForm::constant(form.constant.powi(*n)))
            } else if *n == 1 {
                Ok(form)
            } else {
                Err(format!("power of a state variable in `{}`", expr))
            }
        }
        Expr::Apply(op, operand) => {
            let mut form = linearize(operand)?;
            match op {
                Operator::Dx | Operator::Dy | Operator::Dt => {
                    form.constant = 0.;
                    for term in &mut form.terms {
                        match op {
                            Operator::Dx => term.order[0] += 1,
                            Operator::Dy => term.order[1] += 1,
                            _ if term.time_derivative => {
                                return Err(format!("second time derivative in `{}`", expr))
                            }
                            _ => term.time_derivative = true,
                        }
                    }
                    Ok(form)
                }
                Operator::Exp | Operator::Cos | Operator::Sin if form.is_constant() => {
                    let c = form.constant;
                    Ok(LinearForm::constant(match op {
                        Operator::Exp => c.exp(),
                        Operator::Cos => c.cos(),
                        _ => c.sin(),
                    }))
                }
                Operator::Integrate => Err(format!("integral in `{}`", expr)),
                _ => Err(format!("nonlinear function `{}`", expr)),
            }
        }
        Expr::Coord(_) => Err(format!("coordinate dependent term `{}`", expr)),
        Expr::Symbol(name) | Expr::Call(name, _) => Err(format!("unexpanded name `{}`", name)),
        Expr::Arg(i) => Err(format!("free argument ${}", i)),
    }
}
