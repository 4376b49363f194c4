//! # single-normalize
//!
//! Size-factor based normalization of single-cell count matrices, part of the single-rust ecosystem.
//!
//! This crate turns raw counts into normalized (and optionally log-transformed) expression
//! values by dividing each sample by a size factor. Different groups of features, such as
//! endogenous genes and spike-in transcripts, can be normalized by different size-factor
//! sets within the same call.
//!
//! ## Core Features
//!
//! - **Per-feature-set size factors**: control sets use their own factors, falling back to the
//!   primary set with a warning when they have none
//! - **Centering**: size factors are rescaled to mean one so normalized values stay on the count scale
//! - **Log transform with pseudo-count**: `log2(x / s + offset)`, optionally keeping zeroes at zero
//! - **Dense, sparse and deferred matrices**: `Array2` from ndarray, `CsrMatrix` from nalgebra-sparse,
//!   and lazily evaluated row sources for matrices that should not be materialized
//! - **Parallel kernel**: rows are normalized in parallel with rayon
//!
//! ## Quick Start
//!
//! Build a [`SingleCellExperiment`] around a count matrix, attach size factors and call
//! [`normalize`]. The result is stored as `"logcounts"` (or `"normcounts"` without the log
//! transform) in the same experiment.
//!
//! ## Module Organization
//!
//! - **[`normalization`]**: the normalization engine (size factor resolution, centering, kernel)
//! - **[`experiment`]**: the container abstraction and an in-memory implementation
//! - **[`matrix`]**: dense, sparse and deferred count matrix representations

pub mod experiment;
pub mod matrix;
pub mod normalization;

pub use experiment::{Experiment, FeatureSetIndex, SingleCellExperiment, SizeFactorSetId};
pub use matrix::{DeferredMatrix, ExpressionMatrix, MatrixData, RowSource};
pub use normalization::{
    KernelPath, NormalizationReport, NormalizationWarning, NormalizeOptions, normalize, normalize_with,
};
