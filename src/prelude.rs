//! ot-solvers prelude
//!
//! This module contains the most used types, traits, and functions
//!
//! ```
//! use ot_solvers::prelude::*;
//!
//! ```

pub use crate::OTSolver;

pub use crate::{Convergence, OTError};

pub use crate::exact::{EarthMovers, EarthMovers1D, SimplexStatus};

pub use crate::regularized::{SinkhornKnopp, SinkhornMethod};

pub use crate::unbalanced::SinkhornKnoppUnbalanced;

pub use crate::barycenter::{Barycenter, BarycenterUnbalanced};

pub use crate::metrics::{dist, MetricType, MetricType::Euclidean, MetricType::SqEuclidean};
