//! Rule Evaluator (C1): a boolean predicate tree over a [`RuleContext`](crate::models::RuleContext).

pub mod evaluator;

pub use evaluator::{evaluate_rule, evaluate_ruleset};
