//! Output tasks: named expressions evaluated against the solver state
use crate::domain::{Layout, SpectralEngine};
use crate::equation::{Evaluator, Expr, Value};
use crate::error::OutputError;
use ndarray::Array2;
use num_complex::Complex;

/// Output layout of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLayout {
    /// Local block of physical grid values
    Grid,
    /// Local block of spectral coefficients
    Coeff,
    /// Global scalar, the expression must reduce to a number
    Scalar,
}

impl TaskLayout {
    /// Code stored in segment files
    pub fn code(self) -> u8 {
        match self {
            TaskLayout::Grid => 0,
            TaskLayout::Coeff => 1,
            TaskLayout::Scalar => 2,
        }
    }

    /// Inverse of [`TaskLayout::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TaskLayout::Grid),
            1 => Some(TaskLayout::Coeff),
            2 => Some(TaskLayout::Scalar),
            _ => None,
        }
    }

    /// Global index of the local block and global shape
    pub fn placement<E: SpectralEngine + ?Sized>(self, engine: &E) -> ([usize; 2], [usize; 2]) {
        match self {
            TaskLayout::Grid => (engine.local_start(Layout::Grid), engine.global_shape()),
            TaskLayout::Coeff => (
                engine.local_start(Layout::Coeff),
                engine.global_shape_spectral(),
            ),
            TaskLayout::Scalar => ([0, 0], [1, 1]),
        }
    }
}

/// Evaluated task data of one process
#[derive(Debug, Clone, PartialEq)]
pub enum TaskData {
    /// Physical block
    Grid(Array2<f64>),
    /// Coefficient block
    Coeff(Array2<Complex<f64>>),
    /// Scalar, identical on every process
    Scalar(f64),
}

impl TaskData {
    /// Layout of the data
    pub fn layout(&self) -> TaskLayout {
        match self {
            TaskData::Grid(_) => TaskLayout::Grid,
            TaskData::Coeff(_) => TaskLayout::Coeff,
            TaskData::Scalar(_) => TaskLayout::Scalar,
        }
    }
}

/// Named expression with output layout
#[derive(Debug, Clone)]
pub struct Task {
    /// Dataset name
    pub name: String,
    /// Expression, names are resolved when the task is evaluated
    pub expr: Expr,
    /// Output layout
    pub layout: TaskLayout,
}

impl Task {
    /// Evaluate an expanded expression of this task
    ///
    /// # Errors
    /// Evaluation fails or a scalar task does not reduce to a number.
    pub fn evaluate<E: SpectralEngine + ?Sized>(
        &self,
        evaluator: &Evaluator<E>,
        expanded: &Expr,
        engine: &E,
    ) -> Result<TaskData, OutputError> {
        let task_err = |reason: String| OutputError::Task {
            task: self.name.clone(),
            reason,
        };
        match self.layout {
            TaskLayout::Grid => {
                let value = evaluator.eval(expanded).map_err(task_err)?;
                Ok(TaskData::Grid(value.into_grid(engine.local_shape(Layout::Grid))))
            }
            TaskLayout::Coeff => Ok(TaskData::Coeff(
                evaluator.eval_coeff(expanded).map_err(task_err)?,
            )),
            TaskLayout::Scalar => match evaluator.eval(expanded).map_err(task_err)? {
                Value::Scalar(s) => Ok(TaskData::Scalar(s)),
                Value::Grid(_) => Err(task_err(
                    "expression is not a scalar, wrap it in integ(..)".to_owned(),
                )),
            },
        }
    }
}
