use regex::Regex;
use crate::core::error::Result;
use crate::index::stats::CorpusStats;
use crate::query::ast::{BooleanOp, Query};

/// Cost assigned to terms with no corpus presence so they still sort
/// after everything observed.
const UNKNOWN_TERM_COST: f64 = 1000.0;

/// One step of the execution plan, carrying a cost estimate and an
/// expected result count.
#[derive(Debug, Clone)]
pub enum PlanNode {
    TermStep {
        field: String,
        token: String,
        boost: f64,
        cost: f64,
        estimated: f64,
    },
    BooleanStep {
        op: BooleanOp,
        children: Vec<PlanNode>,
        cost: f64,
        estimated: f64,
    },
    PhraseStep {
        field: String,
        tokens: Vec<String>,
        boost: f64,
        cost: f64,
        estimated: f64,
    },
    WildcardStep {
        field: String,
        pattern: String,
        regex: Regex,
        boost: f64,
        cost: f64,
        estimated: f64,
    },
    MatchAllStep {
        boost: f64,
        cost: f64,
        estimated: f64,
    },
}

impl PlanNode {
    pub fn cost(&self) -> f64 {
        match self {
            PlanNode::TermStep { cost, .. }
            | PlanNode::BooleanStep { cost, .. }
            | PlanNode::PhraseStep { cost, .. }
            | PlanNode::WildcardStep { cost, .. }
            | PlanNode::MatchAllStep { cost, .. } => *cost,
        }
    }

    pub fn estimated(&self) -> f64 {
        match self {
            PlanNode::TermStep { estimated, .. }
            | PlanNode::BooleanStep { estimated, .. }
            | PlanNode::PhraseStep { estimated, .. }
            | PlanNode::WildcardStep { estimated, .. }
            | PlanNode::MatchAllStep { estimated, .. } => *estimated,
        }
    }
}

/// Turns the logical tree into an ordered execution plan using corpus
/// statistics for selectivity estimates.
pub struct QueryPlanner<'a> {
    index: &'a str,
    stats: &'a CorpusStats,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(index: &'a str, stats: &'a CorpusStats) -> Self {
        QueryPlanner { index, stats }
    }

    pub fn plan(&self, query: &Query) -> Result<PlanNode> {
        let total_docs = self.stats.total_documents(self.index) as f64;

        match query {
            Query::Term(term) => Ok(self.plan_term(&term.field, &term.token, term.boost.unwrap_or(1.0))),

            Query::Boolean(boolean) => {
                let mut children = Vec::with_capacity(boolean.children.len());
                for child in &boolean.children {
                    children.push(self.plan(child)?);
                }

                let cost_sum: f64 = children.iter().map(PlanNode::cost).sum();
                let (op, cost, estimated) = match boolean.op {
                    BooleanOp::And => {
                        // Most selective child first enables early exit.
                        children.sort_by(|a, b| a.cost().total_cmp(&b.cost()));
                        let min_est = children.iter()
                            .map(PlanNode::estimated)
                            .fold(f64::INFINITY, f64::min);
                        let estimated = if min_est.is_finite() { min_est } else { 0.0 };
                        (BooleanOp::And, cost_sum, estimated)
                    }
                    BooleanOp::Or => {
                        let estimated = children.iter().map(PlanNode::estimated).sum();
                        (BooleanOp::Or, cost_sum, estimated)
                    }
                    BooleanOp::Not => {
                        let excluded: f64 = children.iter().skip(1).map(PlanNode::estimated).sum();
                        let estimated = (total_docs - excluded).max(0.0);
                        (BooleanOp::Not, 1.5 * cost_sum, estimated)
                    }
                };

                Ok(PlanNode::BooleanStep { op, children, cost, estimated })
            }

            Query::Phrase(phrase) => {
                // A phrase rides on the boolean AND of its terms.
                let mut terms: Vec<PlanNode> = phrase.tokens
                    .iter()
                    .map(|token| self.plan_term(&phrase.field, token, 1.0))
                    .collect();
                terms.sort_by(|a, b| a.cost().total_cmp(&b.cost()));

                let cost_sum: f64 = terms.iter().map(PlanNode::cost).sum();
                let min_est = terms.iter()
                    .map(PlanNode::estimated)
                    .fold(f64::INFINITY, f64::min);
                let and_estimated = if min_est.is_finite() { min_est } else { 0.0 };

                Ok(PlanNode::PhraseStep {
                    field: phrase.field.clone(),
                    tokens: phrase.tokens.clone(),
                    boost: phrase.boost.unwrap_or(1.0),
                    cost: cost_sum * 1.5,
                    estimated: and_estimated * 0.3,
                })
            }

            Query::Wildcard(wildcard) => {
                let pattern = wildcard.pattern.to_lowercase();
                let base = base_pattern(&pattern);
                let wildcard_chars = pattern.chars().filter(|c| *c == '*' || *c == '?').count();
                let leading = pattern.starts_with('*') || pattern.starts_with('?');

                // No prefix index helps a leading wildcard.
                let mut cost = 100.0 * (1 + wildcard_chars) as f64;
                if leading {
                    cost += 1000.0;
                }
                let estimated = total_docs / (base.len() as f64 + 1.0);

                Ok(PlanNode::WildcardStep {
                    field: wildcard.field.clone(),
                    regex: compile_wildcard(&pattern)?,
                    pattern,
                    boost: wildcard.boost.unwrap_or(1.0),
                    cost,
                    estimated,
                })
            }

            Query::MatchAll(match_all) => Ok(PlanNode::MatchAllStep {
                boost: match_all.boost,
                cost: total_docs,
                estimated: total_docs,
            }),
        }
    }

    fn plan_term(&self, field: &str, token: &str, boost: f64) -> PlanNode {
        let local = format!("{}:{}", field, token.to_lowercase());
        let df = self.stats.df(self.index, &local) as f64;

        PlanNode::TermStep {
            field: field.to_string(),
            token: token.to_string(),
            boost,
            cost: if df > 0.0 { df } else { UNKNOWN_TERM_COST },
            estimated: df,
        }
    }
}

/// The literal characters of a glob pattern, wildcards stripped.
pub fn base_pattern(pattern: &str) -> String {
    pattern.chars().filter(|c| *c != '*' && *c != '?').collect()
}

/// The literal prefix before the first wildcard character.
pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

/// Compile a glob into an anchored, case-insensitive regex: `?` -> `.`,
/// `*` -> `.*`, everything else escaped.
pub fn compile_wildcard(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Ok(regex::RegexBuilder::new(&expr).case_insensitive(true).build()?)
}
