//! Rows of the policy builder: a coefficient, an operator, a variable and an
//! optional condition.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// Smallest coefficient a term may carry.
pub const COEFFICIENT_MIN: f64 = -1000.0;
/// Largest coefficient a term may carry.
pub const COEFFICIENT_MAX: f64 = 1000.0;
/// Coefficient assigned to freshly added terms.
pub const DEFAULT_COEFFICIENT: f64 = 1.0;

/// Clamps a coefficient into `[COEFFICIENT_MIN, COEFFICIENT_MAX]`.
///
/// Infinite values clamp to the nearest bound; `NaN` has no position in the
/// range and is rejected.
pub fn clamp_coefficient(value: f64) -> Result<f64> {
    if value.is_nan() {
        return Err(PolicyError::invalid_input("coefficient", "NaN is not a coefficient"));
    }
    Ok(value.clamp(COEFFICIENT_MIN, COEFFICIENT_MAX))
}

/// How a term combines its coefficient with its variable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    #[default]
    Multiply,
    Add,
    Subtract,
}

impl Operator {
    /// All operators in the order the builder offers them.
    pub const ALL: [Operator; 3] = [Operator::Multiply, Operator::Add, Operator::Subtract];

    /// Symbol emitted into the generated formula.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Multiply => "*",
            Operator::Add => "+",
            Operator::Subtract => "-",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "*" | "MULTIPLY" => Ok(Operator::Multiply),
            "+" | "ADD" => Ok(Operator::Add),
            "-" | "SUBTRACT" => Ok(Operator::Subtract),
            _ => Err(PolicyError::invalid_input(
                "operator",
                format!("`{trimmed}` is not one of *, +, -"),
            )),
        }
    }
}

/// Optional comparison that turns a term into an indicator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    #[default]
    None,
    Equal,
    GreaterThan,
    LessThan,
}

impl Condition {
    /// All conditions in the order the builder offers them.
    pub const ALL: [Condition; 4] = [
        Condition::None,
        Condition::Equal,
        Condition::GreaterThan,
        Condition::LessThan,
    ];

    /// Comparison symbol, or `None` for unconditional terms.
    pub fn symbol(self) -> Option<&'static str> {
        match self {
            Condition::None => None,
            Condition::Equal => Some("=="),
            Condition::GreaterThan => Some(">"),
            Condition::LessThan => Some("<"),
        }
    }

    /// Whether the term is unconditional.
    pub fn is_none(self) -> bool {
        self == Condition::None
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol().unwrap_or("None"))
    }
}

impl FromStr for Condition {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(Condition::None),
            "==" | "EQUAL" => Ok(Condition::Equal),
            ">" | "GREATER_THAN" => Ok(Condition::GreaterThan),
            "<" | "LESS_THAN" => Ok(Condition::LessThan),
            _ => Err(PolicyError::invalid_input(
                "condition",
                format!("`{trimmed}` is not one of None, ==, >, <"),
            )),
        }
    }
}

/// Finite check shared by every path that binds a comparison operand.
fn check_comparison(value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(PolicyError::invalid_input(
            "comparison",
            format!("{value} is not a finite number"),
        ));
    }
    Ok(value)
}

/// Serialized shape of a [`Term`], checked on the way in.
#[derive(Deserialize)]
struct RawTerm {
    coefficient: f64,
    operator: Operator,
    variable: String,
    #[serde(default)]
    condition: Condition,
    #[serde(default)]
    comparison: Option<f64>,
}

impl TryFrom<RawTerm> for Term {
    type Error = PolicyError;

    fn try_from(raw: RawTerm) -> Result<Self> {
        Ok(Self {
            coefficient: clamp_coefficient(raw.coefficient)?,
            operator: raw.operator,
            variable: raw.variable,
            condition: raw.condition,
            comparison: raw.comparison.map(check_comparison).transpose()?,
        })
    }
}

/// One row of the policy builder.
///
/// Every constructor and deserialized value goes through the same range and
/// finiteness checks, so the compiler only ever sees well-formed terms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTerm")]
pub struct Term {
    /// Weight applied to the variable, always inside the coefficient range.
    pub(crate) coefficient: f64,
    pub(crate) operator: Operator,
    /// Name drawn from the table's allowed variables.
    pub(crate) variable: String,
    pub(crate) condition: Condition,
    /// Right-hand operand of a conditional term. Left unbound, the compiler
    /// emits a placeholder for the host to fill in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) comparison: Option<f64>,
}

impl Term {
    /// Creates a term with the builder defaults for the given variable.
    pub fn new<S: Into<String>>(variable: S) -> Self {
        Self {
            coefficient: DEFAULT_COEFFICIENT,
            operator: Operator::default(),
            variable: variable.into(),
            condition: Condition::default(),
            comparison: None,
        }
    }

    /// Sets the coefficient, clamping it into range.
    pub fn with_coefficient(mut self, coefficient: f64) -> Result<Self> {
        self.coefficient = clamp_coefficient(coefficient)?;
        Ok(self)
    }

    /// Sets how the coefficient combines with the variable.
    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Sets the comparison applied to the variable.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Binds the comparison operand; non-finite values are rejected.
    pub fn with_comparison(mut self, comparison: f64) -> Result<Self> {
        self.comparison = Some(check_comparison(comparison)?);
        Ok(self)
    }

    /// Binds or clears the comparison operand.
    pub(crate) fn set_comparison(&mut self, comparison: Option<f64>) -> Result<()> {
        self.comparison = comparison.map(check_comparison).transpose()?;
        Ok(())
    }

    /// Weight applied to the variable.
    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    /// How the coefficient combines with the variable.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Variable name the term reads.
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Comparison applied to the variable, if any.
    pub fn condition(&self) -> Condition {
        self.condition
    }

    /// Bound comparison operand, if any.
    pub fn comparison(&self) -> Option<f64> {
        self.comparison
    }

    /// Whether the term renders as a comparison rather than a combination.
    pub fn is_conditional(&self) -> bool {
        !self.condition.is_none()
    }
}
