//! Error taxonomy of a simulation run
//!
//! Configuration and closure errors are fatal before the first step,
//! numerical instabilities abort the time loop. Output and merge errors
//! are reported per analysis handler and never stop other handlers.
use std::path::PathBuf;
use thiserror::Error;

/// Crate wide result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top level error of a run
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid parameter, inconsistent process mesh
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Equation system is not closed
    #[error(transparent)]
    Closure(#[from] EquationClosureError),
    /// A field holds non-finite values after a step
    #[error(
        "numerical instability: field `{variable}` is not finite \
         (iteration {iteration}, sim_time {sim_time:.6e})"
    )]
    NumericalInstability {
        /// Name of the first non-finite field
        variable: String,
        /// Iteration after the failed step
        iteration: usize,
        /// Simulation time after the failed step
        sim_time: f64,
    },
    /// Expression could not be evaluated
    #[error("evaluation of `{name}` failed: {reason}")]
    Evaluation {
        /// Equation or task name
        name: String,
        /// Reason
        reason: String,
    },
    /// Writing analysis output failed
    #[error(transparent)]
    Output(#[from] OutputError),
    /// Consolidating analysis output failed
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// Singular implicit system for one mode
    #[error("linear solve failed for mode ({kx}, {ky}): {reason}")]
    LinearAlgebra {
        /// Wavenumber along x
        kx: i64,
        /// Wavenumber along y
        ky: i64,
        /// Reason reported by the lapack backend
        reason: String,
    },
}

/// Startup errors of configuration and domain setup
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Required key is absent
    #[error("missing parameter `{0}`")]
    Missing(String),
    /// Value out of its admissible range
    #[error("invalid parameter `{name}`: {reason}")]
    Invalid {
        /// Parameter name
        name: String,
        /// Why the value was rejected
        reason: String,
    },
    /// Mesh product differs from the process count
    #[error("process mesh {mesh:?} does not match {nprocs} processes")]
    MeshMismatch {
        /// Requested mesh
        mesh: [usize; 2],
        /// Number of processes
        nprocs: usize,
    },
    /// Mesh shape the slab decomposition cannot realise
    #[error("process mesh {0:?} is not supported, only slabs [p, 1] are")]
    UnsupportedMesh([usize; 2]),
    /// Malformed mesh string on the command line
    #[error("malformed process mesh `{0}`, expected `p0,p1`")]
    MalformedMesh(String),
    /// Configuration file not readable
    #[error("cannot read configuration {path:?}")]
    Io {
        /// Configuration path
        path: PathBuf,
        /// Source
        #[source]
        source: std::io::Error,
    },
    /// Configuration file not parseable
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Build time errors of an equation system
#[derive(Debug, Error, PartialEq)]
pub enum EquationClosureError {
    /// Reference to an undeclared name
    #[error("unresolved symbol `{symbol}` in {location}")]
    UnresolvedSymbol {
        /// First offending symbol
        symbol: String,
        /// Substitution, equation or task containing it
        location: String,
    },
    /// Name declared twice
    #[error("symbol `{0}` is declared twice")]
    DuplicateSymbol(String),
    /// Substitution expands into itself
    #[error("substitution `{0}` is recursive")]
    RecursiveSubstitution(String),
    /// Substitution used with the wrong number of arguments
    #[error("substitution `{name}` expects {expected} arguments, got {got}")]
    Arity {
        /// Substitution name
        name: String,
        /// Declared arity
        expected: usize,
        /// Supplied arguments
        got: usize,
    },
    /// Left hand side is not linear in the state variables
    #[error("left hand side of {location} is not linear: {reason}")]
    NonlinearLhs {
        /// Equation label
        location: String,
        /// Offending term
        reason: String,
    },
    /// Time derivative outside of a left hand side
    #[error("time derivative on the right hand side of {0}")]
    TimeDerivativeOnRhs(String),
    /// Equation evolves more than one variable
    #[error("{location} takes time derivatives of `{first}` and `{second}`")]
    MultipleTimeDerivatives {
        /// Equation label
        location: String,
        /// First variable under dt
        first: String,
        /// Second variable under dt
        second: String,
    },
    /// Constraint cannot be attached to a variable
    #[error("constraint {0} has no unambiguous closing variable")]
    AmbiguousConstraint(String),
    /// Some modes of a variable are not claimed by any equation
    #[error("variable `{variable}` is not closed on {condition} modes")]
    PartitionGap {
        /// Variable
        variable: String,
        /// Mode class left open
        condition: String,
    },
    /// Some modes of a variable are claimed twice
    #[error("variable `{variable}` is closed twice on {condition} modes")]
    PartitionOverlap {
        /// Variable
        variable: String,
        /// Mode class claimed twice
        condition: String,
    },
}

/// Failure of a single analysis write
#[derive(Debug, Error)]
pub enum OutputError {
    /// Segment directory or file could not be created
    #[error("cannot create {path:?}")]
    Create {
        /// Path
        path: PathBuf,
        /// Source
        #[source]
        source: std::io::Error,
    },
    /// Backend error
    #[error("hdf5 error in {path:?}: {source}")]
    Hdf5 {
        /// Segment file
        path: PathBuf,
        /// Source
        #[source]
        source: hdf5::Error,
    },
    /// Task could not be evaluated
    #[error("task `{task}`: {reason}")]
    Task {
        /// Task name
        task: String,
        /// Reason
        reason: String,
    },
}

/// Consolidation error of one handler
#[derive(Debug, Error)]
pub enum MergeError {
    /// No segment directory found
    #[error("no segments found under {0:?}")]
    NoSegments(PathBuf),
    /// Directory listing failed
    #[error("cannot list {path:?}")]
    Io {
        /// Directory
        path: PathBuf,
        /// Source
        #[source]
        source: std::io::Error,
    },
    /// Shard or merged file unreadable
    #[error("corrupt file {path:?}: {source}")]
    Corrupt {
        /// File
        path: PathBuf,
        /// Source
        #[source]
        source: hdf5::Error,
    },
    /// Merged file could not be written
    #[error("cannot write merged file {path:?}: {source}")]
    Write {
        /// Merged file
        path: PathBuf,
        /// Source
        #[source]
        source: hdf5::Error,
    },
    /// Shards disagree on task layout
    #[error("inconsistent shards in {path:?}: {reason}")]
    Inconsistent {
        /// Set directory
        path: PathBuf,
        /// Reason
        reason: String,
    },
}
