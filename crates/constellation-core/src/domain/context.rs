//! Contexts and steal strategies.
//!
//! Activities *request* a context, executors *offer* one. Whether an offer
//! satisfies a request is decided by [`satisfied`] under a [`StealStrategy`].
//! The decision table is closed: every variant is handled in one `match`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ConfigError;

/// Context requested by an activity.
///
/// Equality needs both name and rank. The hash only looks at the name, so
/// contexts that differ by rank collide and are told apart by `eq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityContext {
    name: String,
    rank: i64,
}

impl ActivityContext {
    pub fn new(name: impl Into<String>, rank: i64) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyContextName);
        }
        Ok(Self { name, rank })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> i64 {
        self.rank
    }
}

impl PartialEq for ActivityContext {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.rank == other.rank
    }
}

impl Eq for ActivityContext {}

impl Hash for ActivityContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ActivityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.rank)
    }
}

/// A single offered capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitExecutorContext {
    name: String,
}

impl UnitExecutorContext {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyContextName);
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Context offered by an executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExecutorContext {
    Unit(UnitExecutorContext),
    /// Satisfied when any of the contained units is.
    Or(Vec<UnitExecutorContext>),
}

impl ExecutorContext {
    pub fn unit(name: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self::Unit(UnitExecutorContext::new(name)?))
    }

    pub fn or<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let units = names
            .into_iter()
            .map(UnitExecutorContext::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Or(units))
    }

    /// Checks the names carried by this context (deserialized configs skip the constructors).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let empty = match self {
            ExecutorContext::Unit(unit) => unit.name.is_empty(),
            ExecutorContext::Or(units) => units.is_empty() || units.iter().any(|u| u.name.is_empty()),
        };
        if empty {
            return Err(ConfigError::EmptyContextName);
        }
        Ok(())
    }
}

impl fmt::Display for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorContext::Unit(unit) => f.write_str(&unit.name),
            ExecutorContext::Or(units) => {
                let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
                write!(f, "{}", names.join("|"))
            }
        }
    }
}

/// Rule for matching an offered context against a requested one.
///
/// `Any`, `Biggest` and `Smallest` ignore the rank when matching; `Biggest`
/// and `Smallest` only change which of several matches is picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StealStrategy {
    #[default]
    Any,
    Biggest,
    Smallest,
    Value { value: i64 },
    Range { lo: i64, hi: i64 },
}

impl StealStrategy {
    pub fn value(value: i64) -> Self {
        StealStrategy::Value { value }
    }

    pub fn range(lo: i64, hi: i64) -> Result<Self, ConfigError> {
        if lo > hi {
            return Err(ConfigError::InvalidRange { lo, hi });
        }
        Ok(StealStrategy::Range { lo, hi })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            StealStrategy::Range { lo, hi } if lo > hi => Err(ConfigError::InvalidRange { lo, hi }),
            _ => Ok(()),
        }
    }

    fn admits(&self, rank: i64) -> bool {
        match *self {
            StealStrategy::Any | StealStrategy::Biggest | StealStrategy::Smallest => true,
            StealStrategy::Value { value } => rank == value,
            StealStrategy::Range { lo, hi } => lo <= rank && rank <= hi,
        }
    }
}

/// Does `offered` satisfy `requested` under `strategy`?
///
/// Pure and cheap: O(1) for a unit offer, O(n) for an or-offer.
pub fn satisfied(
    requested: &ActivityContext,
    offered: &ExecutorContext,
    strategy: &StealStrategy,
) -> bool {
    match offered {
        ExecutorContext::Unit(unit) => unit_satisfied(requested, unit, strategy),
        ExecutorContext::Or(units) => units
            .iter()
            .any(|unit| unit_satisfied(requested, unit, strategy)),
    }
}

fn unit_satisfied(
    requested: &ActivityContext,
    offered: &UnitExecutorContext,
    strategy: &StealStrategy,
) -> bool {
    requested.name == offered.name && strategy.admits(requested.rank)
}

/// What a node advertises about one of its executors to the rest of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorProfile {
    pub context: ExecutorContext,
    pub steal_strategy: StealStrategy,
}

impl ExecutorProfile {
    pub fn new(context: ExecutorContext, steal_strategy: StealStrategy) -> Self {
        Self {
            context,
            steal_strategy,
        }
    }

    pub fn can_run(&self, requested: &ActivityContext) -> bool {
        satisfied(requested, &self.context, &self.steal_strategy)
    }
}
