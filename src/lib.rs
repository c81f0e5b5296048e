//! Production planning for cellular manufacturing systems.
//!
//! An instance document is validated into index sets and parameter tables, turned into a mixed
//! integer program over a pluggable [`Engine`](solver::Engine), solved, and reported.

pub mod config;
pub mod demand;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod problem;
pub mod report;
pub mod solver;
