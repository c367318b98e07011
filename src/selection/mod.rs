//! Candidate Selector (C2) and Selection Strategy (C3).

pub mod selector;
pub mod strategy;

pub use selector::select;
pub use strategy::{PriorityStrategy, RoundRobinStrategy, Strategy};
