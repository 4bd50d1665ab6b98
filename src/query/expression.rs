//! Expression policy and evaluation.
//!
//! Query operands may be expressions (`${currentUser()}`) instead of
//! literals. [`ExpressionGuard`] decides, from where a query comes from,
//! whether expressions are allowed at all; it always runs before any
//! [`ExpressionEvaluator`] is called.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use tracing::warn;

use super::builder::TaskQuery;
use crate::authorization::Authentication;
use crate::config::EngineConfig;
use crate::error::TaskError;

/// Message for expressions rejected in adhoc queries and filter extensions.
pub const ADHOC_EXPRESSIONS_FORBIDDEN: &str = "Expressions are forbidden in adhoc queries. \
     This behavior can be toggled in the process engine configuration";

/// Message for expressions rejected when saving a stored filter.
pub const STORED_EXPRESSIONS_FORBIDDEN: &str = "Expressions are forbidden in stored queries. \
     This behavior can be toggled in the process engine configuration";

/// Where a query being executed or saved comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOrigin {
    /// Built and executed in one call.
    Adhoc,
    /// A stored filter being saved or executed as stored.
    StoredFilter,
    /// The per-call extension applied to a stored filter.
    StoredFilterExtension,
}

/// Policy gate for expression operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionGuard {
    allow_adhoc: bool,
    allow_stored: bool,
}

impl ExpressionGuard {
    /// A guard with explicit policies.
    pub fn new(allow_adhoc: bool, allow_stored: bool) -> Self {
        Self {
            allow_adhoc,
            allow_stored,
        }
    }

    /// A guard with the policies of `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.allow_expressions_in_adhoc_queries,
            config.allow_expressions_in_stored_queries,
        )
    }

    /// Checks a query about to be executed.
    ///
    /// Stored filters executed as stored always pass: they were checked
    /// when saved. Extensions fall under the adhoc policy.
    pub fn check(&self, origin: QueryOrigin, query: &TaskQuery) -> Result<(), TaskError> {
        match origin {
            QueryOrigin::StoredFilter => Ok(()),
            QueryOrigin::Adhoc | QueryOrigin::StoredFilterExtension => {
                if !self.allow_adhoc && query.has_expressions() {
                    warn!(?origin, "rejected expression in adhoc query");
                    return Err(TaskError::BadRequest(ADHOC_EXPRESSIONS_FORBIDDEN.to_string()));
                }
                Ok(())
            },
        }
    }

    /// Checks a query about to be persisted as a stored filter.
    pub fn check_save(&self, query: &TaskQuery) -> Result<(), TaskError> {
        if !self.allow_stored && query.has_expressions() {
            warn!("rejected expression in stored query");
            return Err(TaskError::Engine(STORED_EXPRESSIONS_FORBIDDEN.to_string()));
        }
        Ok(())
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionValue {
    /// No value, e.g. `currentUser()` without an authenticated user.
    Null,
    /// A string.
    String(String),
    /// A list of strings.
    Strings(Vec<String>),
    /// An instant.
    Date(DateTime<Utc>),
}

/// Inputs available to expressions.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionContext<'a> {
    /// The calling principal, if authenticated.
    pub authentication: Option<&'a Authentication>,
    /// Engine time.
    pub now: DateTime<Utc>,
}

/// Evaluates query expressions.
pub trait ExpressionEvaluator: Send + Sync + fmt::Debug {
    /// Evaluates `expression` (including its `${...}` delimiters).
    fn evaluate(
        &self,
        expression: &str,
        ctx: &ExpressionContext<'_>,
    ) -> Result<ExpressionValue, TaskError>;
}

/// Evaluator for the built-in query functions.
///
/// Understands `${currentUser()}`, `${currentUserGroups()}`, `${now()}` and
/// `${dateTime()}` followed by `.plusDays(n)`-style adjustments and an
/// optional `.toDate()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinExpressionEvaluator;

static DATE_STEP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.(plus|minus)(Seconds|Minutes|Hours|Days|Weeks|Months)\((\d+)\)")
        .expect("date step pattern is valid")
});

fn unknown(expression: &str) -> TaskError {
    TaskError::BadRequest(format!("Unknown expression: {expression}"))
}

fn apply_step(
    instant: DateTime<Utc>,
    sign: &str,
    unit: &str,
    amount: i64,
) -> Option<DateTime<Utc>> {
    let forward = sign == "plus";
    if unit == "Months" {
        let months = Months::new(u32::try_from(amount).ok()?);
        return if forward {
            instant.checked_add_months(months)
        } else {
            instant.checked_sub_months(months)
        };
    }
    let delta = match unit {
        "Seconds" => Duration::try_seconds(amount)?,
        "Minutes" => Duration::try_minutes(amount)?,
        "Hours" => Duration::try_hours(amount)?,
        "Days" => Duration::try_days(amount)?,
        "Weeks" => Duration::try_weeks(amount)?,
        _ => return None,
    };
    if forward {
        instant.checked_add_signed(delta)
    } else {
        instant.checked_sub_signed(delta)
    }
}

impl BuiltinExpressionEvaluator {
    fn date_time(expression: &str, chain: &str, now: DateTime<Utc>) -> Result<ExpressionValue, TaskError> {
        let mut rest = chain;
        let mut instant = now;
        loop {
            if rest.is_empty() || rest == ".toDate()" {
                return Ok(ExpressionValue::Date(instant));
            }
            let caps = DATE_STEP.captures(rest).ok_or_else(|| unknown(expression))?;
            let amount: i64 = caps[3].parse().map_err(|_| unknown(expression))?;
            instant = apply_step(instant, &caps[1], &caps[2], amount)
                .ok_or_else(|| TaskError::BadRequest(format!("Date out of range: {expression}")))?;
            rest = &rest[caps[0].len()..];
        }
    }
}

impl ExpressionEvaluator for BuiltinExpressionEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        ctx: &ExpressionContext<'_>,
    ) -> Result<ExpressionValue, TaskError> {
        let body: String = expression
            .trim()
            .strip_prefix("${")
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| unknown(expression))?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        match body.as_str() {
            "currentUser()" => Ok(ctx
                .authentication
                .map_or(ExpressionValue::Null, |a| ExpressionValue::String(a.user_id.clone()))),
            "currentUserGroups()" => Ok(ctx
                .authentication
                .map_or(ExpressionValue::Null, |a| ExpressionValue::Strings(a.group_ids.clone()))),
            "now()" => Ok(ExpressionValue::Date(ctx.now)),
            other => match other.strip_prefix("dateTime()") {
                Some(chain) => Self::date_time(expression, chain, ctx.now),
                None => Err(unknown(expression)),
            },
        }
    }
}
