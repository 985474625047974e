//! Declaration, validation and expansion of an equation system
use super::condition::{Condition, ModeClass};
use super::expr::{Expr, Operator};
use super::linear::{linearize, LinearTerm};
use crate::error::EquationClosureError;
use indexmap::{IndexMap, IndexSet};

/// Named macro expression, re-expanded at every point of use
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    /// Number of formal arguments
    pub arity: usize,
    /// Body, formal arguments are `Expr::Arg`
    pub body: Expr,
}

/// `lhs = rhs` on the modes selected by `condition`
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    /// Implicit part, linear in the state
    pub lhs: Expr,
    /// Explicit part
    pub rhs: Expr,
    /// Modes the equation applies to
    pub condition: Condition,
    /// Variable a constraint closes, inferred when `None`
    pub closing: Option<String>,
    /// Name used in error messages
    pub label: String,
}

impl Equation {
    /// Attach a constraint to the variable it determines
    pub fn closing(&mut self, variable: &str) -> &mut Self {
        self.closing = Some(variable.to_owned());
        self
    }

    /// Set the name used in error messages
    pub fn labeled(&mut self, label: &str) -> &mut Self {
        self.label = label.to_owned();
        self
    }
}

/// Equation after expansion, attached to the variable it closes
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEquation {
    /// Index of the closed variable
    pub variable: usize,
    /// Modes the equation applies to
    pub condition: Condition,
    /// Linear terms of the left hand side
    pub lhs: Vec<LinearTerm>,
    /// Expanded right hand side
    pub rhs: Expr,
    /// Name used in messages
    pub label: String,
}

/// Validated system ready for time integration
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSystem {
    /// Variables in declaration order
    pub variables: IndexSet<String>,
    /// Equations in declaration order
    pub equations: Vec<CompiledEquation>,
}

impl CompiledSystem {
    /// Equation closing `variable` on mode `k`
    pub fn equation_for(&self, variable: usize, k: [i64; 2]) -> Option<&CompiledEquation> {
        self.equations
            .iter()
            .find(|eq| eq.variable == variable && eq.condition.matches(k))
    }
}

/// Symbolic system of evolution equations and constraints
#[derive(Debug, Clone, Default)]
pub struct EquationSystem {
    variables: IndexSet<String>,
    parameters: IndexMap<String, f64>,
    substitutions: IndexMap<String, Substitution>,
    equations: Vec<Equation>,
}

impl EquationSystem {
    /// Empty system
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(&self, name: &str) -> Result<(), EquationClosureError> {
        if self.variables.contains(name)
            || self.parameters.contains_key(name)
            || self.substitutions.contains_key(name)
        {
            return Err(EquationClosureError::DuplicateSymbol(name.to_owned()));
        }
        Ok(())
    }

    /// Declare a state variable
    ///
    /// # Errors
    /// Name already declared.
    pub fn declare_variable(&mut self, name: &str) -> Result<(), EquationClosureError> {
        self.check_unique(name)?;
        self.variables.insert(name.to_owned());
        Ok(())
    }

    /// Declare a named constant
    ///
    /// # Errors
    /// Name already declared.
    pub fn declare_parameter(&mut self, name: &str, value: f64) -> Result<(), EquationClosureError> {
        self.check_unique(name)?;
        self.parameters.insert(name.to_owned(), value);
        Ok(())
    }

    /// Declare a substitution without arguments
    ///
    /// # Errors
    /// Name already declared.
    pub fn declare_substitution(&mut self, name: &str, body: Expr) -> Result<(), EquationClosureError> {
        self.declare_function(name, &[], body)
    }

    /// Declare a substitution with formal arguments, e.g.
    /// `Lap(A) = dx(dx(A)) + dy(dy(A))`
    ///
    /// # Errors
    /// Name already declared.
    pub fn declare_function(
        &mut self,
        name: &str,
        args: &[&str],
        body: Expr,
    ) -> Result<(), EquationClosureError> {
        self.check_unique(name)?;
        let body = body.map(&mut |node| match node {
            Expr::Symbol(s) => match args.iter().position(|a| *a == s) {
                Some(i) => Expr::Arg(i),
                None => Expr::Symbol(s),
            },
            other => other,
        });
        let arity = args.len().max(body.arity());
        self.substitutions
            .insert(name.to_owned(), Substitution { arity, body });
        Ok(())
    }

    /// Add `lhs = rhs` restricted to `condition`
    pub fn add_equation(&mut self, lhs: Expr, rhs: Expr, condition: Condition) -> &mut Equation {
        let label = format!("equation #{}", self.equations.len());
        self.equations.push(Equation {
            lhs,
            rhs,
            condition,
            closing: None,
            label,
        });
        let last = self.equations.len() - 1;
        &mut self.equations[last]
    }

    /// Declared variables
    pub fn variables(&self) -> &IndexSet<String> {
        &self.variables
    }

    /// Value of a parameter
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    /// Declared equations
    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// First name in `expr` that does not resolve
    fn resolve(&self, expr: &Expr, location: &str) -> Result<(), EquationClosureError> {
        let mut result = Ok(());
        expr.walk(&mut |node| {
            if result.is_err() {
                return;
            }
            let (name, got) = match node {
                Expr::Symbol(name) => (name, 0),
                Expr::Call(name, args) => (name, args.len()),
                _ => return,
            };
            let expected = if self.variables.contains(name) || self.parameters.contains_key(name) {
                0
            } else if let Some(sub) = self.substitutions.get(name) {
                sub.arity
            } else {
                result = Err(EquationClosureError::UnresolvedSymbol {
                    symbol: name.clone(),
                    location: location.to_owned(),
                });
                return;
            };
            if expected != got {
                result = Err(EquationClosureError::Arity {
                    name: name.clone(),
                    expected,
                    got,
                });
            }
        });
        result
    }

    fn check_recursion(&self) -> Result<(), EquationClosureError> {
        fn visit<'a>(
            system: &'a EquationSystem,
            name: &'a str,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), EquationClosureError> {
            if stack.contains(&name) {
                return Err(EquationClosureError::RecursiveSubstitution(name.to_owned()));
            }
            let Some(sub) = system.substitutions.get(name) else {
                return Ok(());
            };
            stack.push(name);
            let mut children: Vec<&'a str> = vec![];
            sub.body.walk(&mut |node| match node {
                Expr::Symbol(s) | Expr::Call(s, _) => children.push(s.as_str()),
                _ => {}
            });
            for child in children {
                visit(system, child, stack)?;
            }
            stack.pop();
            Ok(())
        }
        let mut stack = vec![];
        for name in self.substitutions.keys() {
            visit(self, name, &mut stack)?;
        }
        Ok(())
    }

    /// Check that every name resolves and expand `expr` into variables
    /// and constants
    ///
    /// # Errors
    /// Unresolved name, wrong arity, recursive substitution.
    pub fn expand_checked(&self, expr: &Expr, location: &str) -> Result<Expr, EquationClosureError> {
        for (name, sub) in &self.substitutions {
            self.resolve(&sub.body, &format!("substitution `{}`", name))?;
        }
        self.resolve(expr, location)?;
        self.check_recursion()?;
        Ok(self.expand(expr.clone()))
    }

    /// Inline parameters and substitutions. Every occurrence of a
    /// substitution gets its own copy of the body.
    fn expand(&self, expr: Expr) -> Expr {
        expr.map(&mut |node| match node {
            Expr::Symbol(name) => {
                if self.variables.contains(&name) {
                    Expr::Var(name)
                } else if let Some(value) = self.parameters.get(&name) {
                    Expr::Const(*value)
                } else if let Some(sub) = self.substitutions.get(&name) {
                    self.expand(sub.body.clone())
                } else {
                    Expr::Symbol(name)
                }
            }
            Expr::Call(name, args) => match self.substitutions.get(&name) {
                Some(sub) => {
                    let body = self.expand(sub.body.clone());
                    body.map(&mut |inner| match inner {
                        Expr::Arg(i) if i < args.len() => args[i].clone(),
                        other => other,
                    })
                }
                None => Expr::Call(name, args),
            },
            other => other,
        })
    }

    /// Check closure of the system.
    ///
    /// 1. Every name resolves (substitutions first, then equations).
    /// 2. No substitution is recursive.
    /// 3. Every left hand side is linear with constant coefficients and
    ///    evolves at most one variable, right hand sides have no time
    ///    derivatives.
    /// 4. Every equation is attached to exactly one variable.
    /// 5. For every variable the conditions of its equations partition the
    ///    mode space.
    ///
    /// # Errors
    /// First violation found, in the order above.
    pub fn validate(&self) -> Result<(), EquationClosureError> {
        self.compile().map(|_| ())
    }

    /// Validate and lower into a [`CompiledSystem`]
    ///
    /// # Errors
    /// See [`EquationSystem::validate`].
    pub fn compile(&self) -> Result<CompiledSystem, EquationClosureError> {
        for (name, sub) in &self.substitutions {
            self.resolve(&sub.body, &format!("substitution `{}`", name))?;
        }
        for eq in &self.equations {
            self.resolve(&eq.lhs, &eq.label)?;
            self.resolve(&eq.rhs, &eq.label)?;
            if let Some(var) = &eq.closing {
                if !self.variables.contains(var) {
                    return Err(EquationClosureError::UnresolvedSymbol {
                        symbol: var.clone(),
                        location: eq.label.clone(),
                    });
                }
            }
        }
        self.check_recursion()?;

        // Structure
        let mut lowered = vec![];
        for eq in &self.equations {
            let rhs = self.expand(eq.rhs.clone());
            if rhs.any(|e| matches!(e, Expr::Apply(Operator::Dt, _))) {
                return Err(EquationClosureError::TimeDerivativeOnRhs(eq.label.clone()));
            }
            let lhs = self.expand(eq.lhs.clone());
            let form = linearize(&lhs).map_err(|reason| EquationClosureError::NonlinearLhs {
                location: eq.label.clone(),
                reason,
            })?;
            if form.constant != 0. {
                return Err(EquationClosureError::NonlinearLhs {
                    location: eq.label.clone(),
                    reason: format!("constant term {} on the left hand side", form.constant),
                });
            }
            let evolved = match form.time_derivative_vars().as_slice() {
                [] => None,
                [var] => Some((*var).to_owned()),
                [first, second, ..] => {
                    return Err(EquationClosureError::MultipleTimeDerivatives {
                        location: eq.label.clone(),
                        first: (*first).to_owned(),
                        second: (*second).to_owned(),
                    })
                }
            };
            lowered.push((eq, evolved, form.terms, rhs));
        }

        // Ownership
        let evolved: IndexSet<String> = lowered
            .iter()
            .filter_map(|(_, var, _, _)| var.clone())
            .collect();
        let unevolved: Vec<&String> = self
            .variables
            .iter()
            .filter(|v| !evolved.contains(*v))
            .collect();
        let mut equations = vec![];
        for (eq, var, lhs, rhs) in lowered {
            let owner = match (var, &eq.closing) {
                (Some(var), _) => var,
                (None, Some(closing)) => closing.clone(),
                (None, None) if unevolved.len() == 1 => unevolved[0].clone(),
                (None, None) => {
                    return Err(EquationClosureError::AmbiguousConstraint(eq.label.clone()))
                }
            };
            let variable = self
                .variables
                .get_index_of(&owner)
                .ok_or_else(|| EquationClosureError::UnresolvedSymbol {
                    symbol: owner.clone(),
                    location: eq.label.clone(),
                })?;
            equations.push(CompiledEquation {
                variable,
                condition: eq.condition,
                lhs,
                rhs,
                label: eq.label.clone(),
            });
        }

        // Partition
        for (index, variable) in self.variables.iter().enumerate() {
            for class in ModeClass::ALL {
                let claims = equations
                    .iter()
                    .filter(|eq| eq.variable == index && eq.condition.covers(class))
                    .count();
                if claims == 0 {
                    return Err(EquationClosureError::PartitionGap {
                        variable: variable.clone(),
                        condition: class.to_string(),
                    });
                }
                if claims > 1 {
                    return Err(EquationClosureError::PartitionOverlap {
                        variable: variable.clone(),
                        condition: class.to_string(),
                    });
                }
            }
        }

        Ok(CompiledSystem {
            variables: self.variables.clone(),
            equations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::expr::{constant, dt, dx, dy, sym};
    use proptest::prelude::*;

    /// Incompressible Stokes flow in the form used by the solver
    fn stokes() -> EquationSystem {
        let mut system = EquationSystem::new();
        for var in ["u", "v", "p"] {
            system.declare_variable(var).unwrap();
        }
        system.declare_parameter("nu", 0.1).unwrap();
        system
            .declare_function("Lap", &["A"], dx(dx(sym("A"))) + dy(dy(sym("A"))))
            .unwrap();
        system.add_equation(
            dt(sym("u")) - sym("nu") * call_lap("u") + dx(sym("p")),
            constant(0.),
            Condition::All,
        );
        system.add_equation(
            dt(sym("v")) - sym("nu") * call_lap("v") + dy(sym("p")),
            constant(0.),
            Condition::All,
        );
        system.add_equation(
            dx(sym("u")) + dy(sym("v")),
            constant(0.),
            Condition::NonzeroMode,
        );
        system.add_equation(sym("p"), constant(0.), Condition::ZeroMode);
        system
    }

    fn call_lap(var: &str) -> Expr {
        crate::equation::expr::call("Lap", vec![sym(var)])
    }

    #[test]
    fn test_stokes_closes() {
        let compiled = stokes().compile().unwrap();
        assert_eq!(compiled.equations.len(), 4);
        // Both constraints close the pressure
        assert_eq!(compiled.equations[2].variable, 2);
        assert_eq!(compiled.equations[3].variable, 2);
        let eq = compiled.equation_for(2, [0, 0]).unwrap();
        assert_eq!(eq.condition, Condition::ZeroMode);
        let eq = compiled.equation_for(2, [1, 0]).unwrap();
        assert_eq!(eq.condition, Condition::NonzeroMode);
    }

    #[test]
    fn test_unresolved_symbol_names_first_offender() {
        let mut system = stokes();
        system.add_equation(dt(sym("w")), sym("q") * sym("r"), Condition::All);
        let err = system.validate().unwrap_err();
        assert_eq!(
            err,
            EquationClosureError::UnresolvedSymbol {
                symbol: "w".to_owned(),
                location: "equation #4".to_owned()
            }
        );
    }

    #[test]
    fn test_unresolved_symbol_in_substitution() {
        let mut system = stokes();
        system.declare_substitution("E", sym("u") * sym("missing")).unwrap();
        let err = system.validate().unwrap_err();
        assert!(
            matches!(err, EquationClosureError::UnresolvedSymbol { symbol, .. } if symbol == "missing")
        );
    }

    #[test]
    fn test_partition_gap() {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.declare_variable("p").unwrap();
        system.add_equation(dt(sym("u")) + dx(sym("p")), constant(0.), Condition::All);
        system.add_equation(dx(sym("u")), constant(0.), Condition::NonzeroMode);
        let err = system.validate().unwrap_err();
        assert!(matches!(
            err,
            EquationClosureError::PartitionGap { variable, .. } if variable == "p"
        ));
    }

    #[test]
    fn test_partition_overlap() {
        let mut system = stokes();
        system.add_equation(sym("p"), constant(0.), Condition::All);
        let err = system.validate().unwrap_err();
        assert!(matches!(
            err,
            EquationClosureError::PartitionOverlap { variable, .. } if variable == "p"
        ));
    }

    #[test]
    fn test_nonlinear_lhs() {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.add_equation(dt(sym("u")) + sym("u") * dx(sym("u")), constant(0.), Condition::All);
        assert!(matches!(
            system.validate().unwrap_err(),
            EquationClosureError::NonlinearLhs { .. }
        ));
    }

    #[test]
    fn test_time_derivative_on_rhs() {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.add_equation(dt(sym("u")), dt(sym("u")), Condition::All);
        assert!(matches!(
            system.validate().unwrap_err(),
            EquationClosureError::TimeDerivativeOnRhs(_)
        ));
    }

    #[test]
    fn test_recursive_substitution() {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        system.declare_substitution("A", sym("B") + 1.).unwrap();
        system.declare_substitution("B", sym("A") * sym("u")).unwrap();
        system.add_equation(dt(sym("u")), sym("A"), Condition::All);
        assert!(matches!(
            system.validate().unwrap_err(),
            EquationClosureError::RecursiveSubstitution(_)
        ));
    }

    #[test]
    fn test_duplicate_symbol() {
        let mut system = EquationSystem::new();
        system.declare_variable("u").unwrap();
        assert_eq!(
            system.declare_parameter("u", 1.),
            Err(EquationClosureError::DuplicateSymbol("u".to_owned()))
        );
    }

    #[test]
    fn test_expansion_recomputes_each_occurrence() {
        let mut system = EquationSystem::new();
        system.declare_variable("a").unwrap();
        system.declare_parameter("k", 2.).unwrap();
        system
            .declare_substitution("E", crate::equation::expr::exp(sym("a")) * sym("k"))
            .unwrap();
        let expanded = system
            .expand_checked(&(sym("E") + sym("E")), "test")
            .unwrap();
        let mut exps = 0;
        expanded.walk(&mut |e| {
            if matches!(e, Expr::Apply(Operator::Exp, _)) {
                exps += 1;
            }
        });
        assert_eq!(exps, 2);
        assert!(!expanded.any(|e| matches!(e, Expr::Symbol(_))));
    }

    fn condition_strategy() -> impl Strategy<Value = Condition> {
        prop_oneof![
            Just(Condition::All),
            Just(Condition::NonzeroMode),
            Just(Condition::ZeroMode),
        ]
    }

    proptest! {
        #[test]
        fn validate_iff_exact_partition(
            conditions in prop::collection::vec(condition_strategy(), 0..4)
        ) {
            let mut system = EquationSystem::new();
            system.declare_variable("p").unwrap();
            for condition in &conditions {
                system.add_equation(sym("p"), constant(0.), *condition);
            }
            let mut exact = true;
            for kx in -3_i64..=3 {
                for ky in 0_i64..=3 {
                    let claims = conditions.iter().filter(|c| c.matches([kx, ky])).count();
                    exact &= claims == 1;
                }
            }
            prop_assert_eq!(system.validate().is_ok(), exact);
        }
    }
}
