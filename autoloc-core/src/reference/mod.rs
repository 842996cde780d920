//! Reference collaborators
//!
//! Self-contained stand-ins for the travel-time tables and hypocenter
//! solver of a production system. They are accurate for synthetic data
//! generated with the same model, which is what the replay tool, tests and
//! benchmarks need.

pub mod gauss_newton;
pub mod velocity;

pub use gauss_newton::GaussNewtonSolver;
pub use velocity::HomogeneousModel;
