//! # Equation system
//! Declaration of state variables, parameters, substitutions and
//! equations as explicit expression trees.
//!
//! Every equation is `lhs = rhs` where the left hand side is linear in the
//! state with constant coefficients (treated implicitly) and the right hand
//! side is an arbitrary expression (treated explicitly). An equation either
//! evolves one variable (`dt` on its left hand side) or is a constraint
//! closing a variable without time derivative.
//!
//! # Example
//! ```
//! use viscoturb::equation::expr::{constant, dt, dx, dy, sym};
//! use viscoturb::equation::{Condition, EquationSystem};
//!
//! let mut system = EquationSystem::new();
//! system.declare_variable("u").unwrap();
//! system.declare_parameter("nu", 0.1).unwrap();
//! system
//!     .declare_function("Lap", &["A"], dx(dx(sym("A"))) + dy(dy(sym("A"))))
//!     .unwrap();
//! let lap = viscoturb::equation::expr::call("Lap", vec![sym("u")]);
//! system.add_equation(dt(sym("u")) - sym("nu") * lap, constant(0.), Condition::All);
//! assert!(system.validate().is_ok());
//! ```
pub mod condition;
pub mod eval;
pub mod expr;
pub mod linear;
pub mod system;
pub use condition::{Condition, ModeClass};
pub use eval::{Evaluator, Value};
pub use expr::{Expr, Operator};
pub use linear::LinearTerm;
pub use system::{CompiledEquation, CompiledSystem, Equation, EquationSystem};
