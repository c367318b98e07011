use regex::Regex;
use serde_json::Value;

use crate::models::{Logic, Operator, Rule, RuleContext, RuleSet};

/// Evaluate one rule against a context. Any type mismatch between the
/// actual value and what the operator expects resolves to `false` rather
/// than propagating an error — callers never see a malformed rule abort
/// the whole selection.
pub fn evaluate_rule(rule: &Rule, ctx: &RuleContext) -> bool {
    let actual = ctx.get_value(&rule.field);

    match rule.operator {
        Operator::Eq => actual.as_ref() == Some(&rule.value),
        Operator::Ne => actual.as_ref() != Some(&rule.value),

        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let (Some(a), Some(e)) = (actual.as_ref().and_then(Value::as_f64), rule.value.as_f64()) else {
                return false;
            };
            match rule.operator {
                Operator::Gt => a > e,
                Operator::Gte => a >= e,
                Operator::Lt => a < e,
                Operator::Lte => a <= e,
                _ => unreachable!(),
            }
        }

        Operator::Contains | Operator::NotContains => {
            let is_not = matches!(rule.operator, Operator::NotContains);
            let (Some(a), Some(e)) = (actual.as_ref().and_then(Value::as_str), rule.value.as_str()) else {
                return is_not;
            };
            let found = a.contains(e);
            if is_not {
                !found
            } else {
                found
            }
        }

        Operator::Regex => {
            let (Some(a), Some(pattern)) = (actual.as_ref().and_then(Value::as_str), rule.value.as_str()) else {
                return false;
            };
            match Regex::new(pattern) {
                Ok(re) => re.is_match(a),
                Err(_) => false,
            }
        }

        Operator::In | Operator::NotIn => {
            let is_not = matches!(rule.operator, Operator::NotIn);
            let Some(list) = rule.value.as_array() else {
                return is_not;
            };
            let Some(a) = actual.as_ref() else {
                return is_not;
            };
            let found = list.contains(a);
            if is_not {
                !found
            } else {
                found
            }
        }

        Operator::Exists => match rule.value.as_bool() {
            Some(true) => actual.is_some(),
            Some(false) => actual.is_none(),
            None => false,
        },
    }
}

/// Evaluate a rule set. An absent or empty rule set matches unconditionally.
pub fn evaluate_ruleset(ruleset: Option<&RuleSet>, ctx: &RuleContext) -> bool {
    let Some(ruleset) = ruleset else {
        return true;
    };
    if ruleset.rules.is_empty() {
        return true;
    }
    match ruleset.logic {
        Logic::And => ruleset.rules.iter().all(|r| evaluate_rule(r, ctx)),
        Logic::Or => ruleset.rules.iter().any(|r| evaluate_rule(r, ctx)),
    }
}
