//! Compiles a sequence of terms into the source text of an allocation policy.
//!
//! The generated function has a fixed shape:
//!
//! ```text
//! def allocation(Allocation, waitlist, donor, **kwargs):
//!     allocated = 2.0 * age + 1.0 - waitlist_days
//!     return allocated
//! ```
//!
//! Every term renders on its own and the pieces are always joined with
//! `" + "`. A subtracting term therefore only negates inside its own text,
//! the outer join never changes sign.

use std::fmt;

use crate::term::Term;

/// Name of the function emitted by [`compile`].
pub const ENTRY_POINT: &str = "allocation";
/// Parameter list of the emitted function.
pub const PARAMETERS: &str = "Allocation, waitlist, donor, **kwargs";
/// Right-hand operand emitted for conditional terms without a bound value.
pub const COMPARISON_PLACEHOLDER: &str = "'value'";
/// Separator placed between rendered terms.
pub const TERM_SEPARATOR: &str = " + ";

/// Source text produced from a term table.
///
/// The formula is a projection: it is rebuilt from the terms on every change
/// and never fed back into them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GeneratedFormula {
    expression: String,
    source: String,
}

impl GeneratedFormula {
    fn from_expression(expression: String) -> Self {
        let source = format!(
            "def {ENTRY_POINT}({PARAMETERS}):\n    allocated = {expression}\n    return allocated"
        );
        Self { expression, source }
    }

    /// The combined expression assigned to `allocated`.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Full function text, ready for display.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the generated function.
    pub fn entry_point(&self) -> &'static str {
        ENTRY_POINT
    }

    /// Whether no term contributed to the expression.
    pub fn is_empty(&self) -> bool {
        self.expression.is_empty()
    }
}

impl Default for GeneratedFormula {
    fn default() -> Self {
        Self::from_expression(String::new())
    }
}

impl fmt::Display for GeneratedFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<GeneratedFormula> for String {
    fn from(value: GeneratedFormula) -> Self {
        value.source
    }
}

/// Compiles terms, in order, into a [`GeneratedFormula`].
///
/// Total over any slice of terms; an empty slice yields the skeleton with an
/// empty expression.
pub fn compile(terms: &[Term]) -> GeneratedFormula {
    let expression = terms
        .iter()
        .map(render_term)
        .collect::<Vec<_>>()
        .join(TERM_SEPARATOR);
    log::debug!("compiled {} policy terms", terms.len());
    GeneratedFormula::from_expression(expression)
}

/// Renders a single term as it appears inside the expression.
pub fn render_term(term: &Term) -> String {
    let coefficient = format_number(term.coefficient);
    match term.condition.symbol() {
        None => format!("{coefficient} {} {}", term.operator.symbol(), term.variable),
        Some(comparison) => {
            let rhs = term
                .comparison
                .map(format_number)
                .unwrap_or_else(|| COMPARISON_PLACEHOLDER.to_string());
            format!("{coefficient} * ({} {comparison} {rhs})", term.variable)
        }
    }
}

/// Decimal rendering that always carries a fractional part (`2.0`, `-0.25`).
fn format_number(value: f64) -> String {
    let mut text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        text.push_str(".0");
    }
    text
}
