//! Expression tree and builder functions
//!
//! Expressions are built with plain functions and operator overloads:
//! ```
//! use viscoturb::equation::expr::{dx, dy, sym};
//! let lap = dx(dx(sym("u"))) + dy(dy(sym("u")));
//! let advection = sym("u") * dx(sym("u")) + sym("v") * dy(sym("u"));
//! let rhs = -advection + 0.5 * lap;
//! ```
//! Names stay unresolved (`Symbol`, `Call`) until an
//! [`EquationSystem`](super::EquationSystem) expands them into variables
//! and constants.
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Operators applied to a single operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Time derivative, only allowed on a left hand side
    Dt,
    /// Spectral derivative along x
    Dx,
    /// Spectral derivative along y
    Dy,
    /// Pointwise exponential
    Exp,
    /// Pointwise cosine
    Cos,
    /// Pointwise sine
    Sin,
    /// Domain integral, evaluates to a scalar
    Integrate,
}

/// Node of an expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant
    Const(f64),
    /// Unresolved name: variable, parameter or substitution without arguments
    Symbol(String),
    /// Substitution applied to arguments
    Call(String, Vec<Expr>),
    /// Formal argument of a substitution body
    Arg(usize),
    /// State variable (resolved)
    Var(String),
    /// Grid coordinate, 0: x, 1: y
    Coord(usize),
    /// Sum
    Add(Vec<Expr>),
    /// Product
    Mul(Vec<Expr>),
    /// Integer power
    Pow(Box<Expr>, i32),
    /// Operator application
    Apply(Operator, Box<Expr>),
}

/// Unresolved name
pub fn sym(name: &str) -> Expr {
    Expr::Symbol(name.to_owned())
}

/// Apply a substitution to arguments
pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(name.to_owned(), args)
}

/// Constant
pub fn constant(value: f64) -> Expr {
    Expr::Const(value)
}

/// x coordinate
pub fn x() -> Expr {
    Expr::Coord(0)
}

/// y coordinate
pub fn y() -> Expr {
    Expr::Coord(1)
}

fn apply(op: Operator, e: Expr) -> Expr {
    Expr::Apply(op, Box::new(e))
}

/// Time derivative
pub fn dt(e: Expr) -> Expr {
    apply(Operator::Dt, e)
}

/// x derivative
pub fn dx(e: Expr) -> Expr {
    apply(Operator::Dx, e)
}

/// y derivative
pub fn dy(e: Expr) -> Expr {
    apply(Operator::Dy, e)
}

/// Exponential
pub fn exp(e: Expr) -> Expr {
    apply(Operator::Exp, e)
}

/// Cosine
pub fn cos(e: Expr) -> Expr {
    apply(Operator::Cos, e)
}

/// Sine
pub fn sin(e: Expr) -> Expr {
    apply(Operator::Sin, e)
}

/// Domain integral
pub fn integ(e: Expr) -> Expr {
    apply(Operator::Integrate, e)
}

impl Expr {
    /// Integer power
    pub fn powi(self, n: i32) -> Expr {
        Expr::Pow(Box::new(self), n)
    }

    /// Visit this node and all children, depth first, left to right
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Call(_, children) | Expr::Add(children) | Expr::Mul(children) => {
                for child in children {
                    child.walk(&mut *f);
                }
            }
            Expr::Pow(base, _) => base.walk(f),
            Expr::Apply(_, e) => e.walk(f),
            Expr::Const(_) | Expr::Symbol(_) | Expr::Arg(_) | Expr::Var(_) | Expr::Coord(_) => {}
        }
    }

    /// True if any node satisfies `pred`
    pub fn any(&self, pred: impl Fn(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= pred(e));
        found
    }

    /// Largest formal argument index plus one
    pub fn arity(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |e| {
            if let Expr::Arg(i) = e {
                n = n.max(i + 1);
            }
        });
        n
    }

    /// Rebuild the tree bottom up, `f` maps every node after its children
    /// were mapped.
    pub fn map(self, f: &mut impl FnMut(Expr) -> Expr) -> Expr {
        let mapped = match self {
            Expr::Call(name, args) => Expr::Call(name, map_all(args, f)),
            Expr::Add(terms) => Expr::Add(map_all(terms, f)),
            Expr::Mul(factors) => Expr::Mul(map_all(factors, f)),
            Expr::Pow(base, n) => Expr::Pow(Box::new(base.map(f)), n),
            Expr::Apply(op, e) => Expr::Apply(op, Box::new(e.map(f))),
            leaf => leaf,
        };
        f(mapped)
    }
}

fn map_all(items: Vec<Expr>, f: &mut impl FnMut(Expr) -> Expr) -> Vec<Expr> {
    let mut mapped = Vec::with_capacity(items.len());
    for item in items {
        mapped.push(item.map(&mut *f));
    }
    mapped
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        match self {
            Expr::Add(mut terms) => {
                terms.push(rhs);
                Expr::Add(terms)
            }
            lhs => Expr::Add(vec![lhs, rhs]),
        }
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        match self {
            Expr::Mul(mut factors) => {
                factors.push(rhs);
                Expr::Mul(factors)
            }
            lhs => Expr::Mul(vec![lhs, rhs]),
        }
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Mul(vec![Expr::Const(-1.), self])
    }
}

impl Sub for Expr {
    type Output = Expr;
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn sub(self, rhs: Expr) -> Expr {
        self + (-rhs)
    }
}

impl Div for Expr {
    type Output = Expr;
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Expr) -> Expr {
        match rhs {
            Expr::Const(c) => self * Expr::Const(1. / c),
            rhs => self * rhs.powi(-1),
        }
    }
}

macro_rules! impl_scalar_ops {
    ($trait: ident, $method: ident) => {
        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                <Expr as $trait<Expr>>::$method(self, Expr::Const(rhs))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                <Expr as $trait<Expr>>::$method(Expr::Const(self), rhs)
            }
        }
    };
}

impl_scalar_ops!(Add, add);
impl_scalar_ops!(Sub, sub);
impl_scalar_ops!(Mul, mul);
impl_scalar_ops!(Div, div);

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Dt => "dt",
            Operator::Dx => "dx",
            Operator::Dy => "dy",
            Operator::Exp => "exp",
            Operator::Cos => "cos",
            Operator::Sin => "sin",
            Operator::Integrate => "integ",
        };
        write!(f, "{}", name)
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        match item {
            Expr::Add(_) => write!(f, "({})", item)?,
            _ => write!(f, "{}", item)?,
        }
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Symbol(name) | Expr::Var(name) => write!(f, "{}", name),
            Expr::Call(name, args) => {
                write!(f, "{}(", name)?;
                join(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::Arg(i) => write!(f, "${}", i),
            Expr::Coord(axis) => write!(f, "{}", if *axis == 0 { "x" } else { "y" }),
            Expr::Add(terms) => join(f, terms, " + "),
            Expr::Mul(factors) => join(f, factors, "*"),
            Expr::Pow(base, n) => write!(f, "({})^{}", base, n),
            Expr::Apply(op, e) => write!(f, "{}({})", op, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_flattens_sums() {
        let e = sym("a") + sym("b") + 1.;
        match e {
            Expr::Add(terms) => assert_eq!(terms.len(), 3),
            _ => panic!("expected sum"),
        }
    }

    #[test]
    fn test_division_by_constant() {
        let e = sym("a") / 4.;
        assert_eq!(e, Expr::Mul(vec![sym("a"), Expr::Const(0.25)]));
    }

    #[test]
    fn test_arity() {
        let e = dx(Expr::Arg(0)) * Expr::Arg(2);
        assert_eq!(e.arity(), 3);
        assert_eq!(sym("u").arity(), 0);
    }

    #[test]
    fn test_display() {
        let e = dt(sym("u")) - dx(dx(sym("u")));
        assert_eq!(e.to_string(), "dt(u) + -1*dx(dx(u))");
    }
}
