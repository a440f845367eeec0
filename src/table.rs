//! The editable term table behind the policy builder.

use std::fmt;
use std::str::FromStr;

use crate::error::{PolicyError, Result};
use crate::formulation::{compile, GeneratedFormula};
use crate::term::{clamp_coefficient, Condition, Operator, Term};

/// Listener invoked with the freshly compiled formula after each mutation.
pub type RecompileCallback = Box<dyn FnMut(&GeneratedFormula) + Send>;

/// Column of a term row, used when edits arrive as raw text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TermField {
    Coefficient,
    Operator,
    Variable,
    Condition,
    Comparison,
}

impl FromStr for TermField {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coeff" | "coefficient" => Ok(TermField::Coefficient),
            "op" | "operator" => Ok(TermField::Operator),
            "var" | "variable" => Ok(TermField::Variable),
            "condition" => Ok(TermField::Condition),
            "value" | "comparison" => Ok(TermField::Comparison),
            other => Err(PolicyError::invalid_input(
                "field",
                format!("`{other}` is not a term column"),
            )),
        }
    }
}

/// A single-field edit of one term.
#[derive(Clone, Debug, PartialEq)]
pub enum TermUpdate {
    Coefficient(f64),
    Operator(Operator),
    Variable(String),
    Condition(Condition),
    /// Binds (or with `None`, unbinds) the comparison operand.
    Comparison(Option<f64>),
}

impl TermUpdate {
    /// Parses a raw cell value for the given column.
    ///
    /// Only the shape of the value is checked here; range clamping and the
    /// variable domain are enforced by [`TermTable::update_term`].
    pub fn parse(field: TermField, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match field {
            TermField::Coefficient => parse_number("coefficient", raw).map(TermUpdate::Coefficient),
            TermField::Operator => raw.parse().map(TermUpdate::Operator),
            TermField::Variable => Ok(TermUpdate::Variable(raw.to_string())),
            TermField::Condition => raw.parse().map(TermUpdate::Condition),
            TermField::Comparison if raw.is_empty() => Ok(TermUpdate::Comparison(None)),
            TermField::Comparison => {
                parse_number("comparison", raw).map(|value| TermUpdate::Comparison(Some(value)))
            }
        }
    }

    /// Column touched by this update.
    pub fn field(&self) -> TermField {
        match self {
            TermUpdate::Coefficient(_) => TermField::Coefficient,
            TermUpdate::Operator(_) => TermField::Operator,
            TermUpdate::Variable(_) => TermField::Variable,
            TermUpdate::Condition(_) => TermField::Condition,
            TermUpdate::Comparison(_) => TermField::Comparison,
        }
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| PolicyError::invalid_input(field, format!("`{raw}` is not a number")))
}

/// Ordered, mutable sequence of terms plus the formula derived from them.
///
/// Every successful mutation recompiles the formula before returning and
/// notifies registered listeners. Rejected mutations leave both the terms and
/// the formula untouched.
pub struct TermTable {
    variables: Vec<String>,
    terms: Vec<Term>,
    formula: GeneratedFormula,
    listeners: Vec<RecompileCallback>,
}

impl TermTable {
    /// Creates an empty table over the allowed variable names, in display order.
    pub fn new<I, S>(variables: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variables: Vec<String> = variables.into_iter().map(Into::into).collect();
        if variables.is_empty() {
            return Err(PolicyError::invalid_input(
                "variables",
                "at least one allowed variable is required",
            ));
        }
        Ok(Self {
            variables,
            terms: Vec::new(),
            formula: compile(&[]),
            listeners: Vec::new(),
        })
    }

    /// Registers a listener that receives every recompiled formula.
    pub fn on_recompile<F>(&mut self, callback: F)
    where
        F: FnMut(&GeneratedFormula) + Send + 'static,
    {
        self.listeners.push(Box::new(callback));
    }

    /// Allowed variable names.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Current rows, in formula order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Row at `index`, if present.
    pub fn term(&self, index: usize) -> Option<&Term> {
        self.terms.get(index)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The formula compiled from the current rows.
    pub fn formula(&self) -> &GeneratedFormula {
        &self.formula
    }

    /// Appends a default term and returns its index.
    pub fn add_term(&mut self) -> usize {
        let term = Term::new(self.variables[0].clone());
        self.terms.push(term);
        let index = self.terms.len() - 1;
        log::debug!("added policy term {index}");
        self.recompile();
        index
    }

    /// Removes the term at `index`, returning it.
    ///
    /// An index outside the table (no selection) is a no-op and returns `None`.
    pub fn remove_term(&mut self, index: usize) -> Option<Term> {
        if index >= self.terms.len() {
            log::debug!("ignoring removal of term {index}; table has {} terms", self.terms.len());
            return None;
        }
        let removed = self.terms.remove(index);
        log::debug!("removed policy term {index}");
        self.recompile();
        Some(removed)
    }

    /// Applies one field edit to the term at `index`.
    pub fn update_term(&mut self, index: usize, update: TermUpdate) -> Result<()> {
        let len = self.terms.len();
        if index >= len {
            return Err(PolicyError::IndexOutOfRange { index, len });
        }

        let field = update.field();
        match update {
            TermUpdate::Coefficient(value) => {
                let coefficient = clamp_coefficient(value).map_err(|err| {
                    log::warn!("rejected coefficient for term {index}: {err}");
                    err
                })?;
                self.terms[index].coefficient = coefficient;
            }
            TermUpdate::Operator(operator) => self.terms[index].operator = operator,
            TermUpdate::Variable(name) => {
                if !self.variables.iter().any(|allowed| *allowed == name) {
                    log::warn!("rejected variable `{name}` for term {index}");
                    return Err(PolicyError::UnknownVariable { name });
                }
                self.terms[index].variable = name;
            }
            TermUpdate::Condition(condition) => self.terms[index].condition = condition,
            TermUpdate::Comparison(value) => self.terms[index].set_comparison(value)?,
        }

        log::debug!("updated {field:?} of policy term {index}");
        self.recompile();
        Ok(())
    }

    /// Parses a raw cell edit and applies it.
    pub fn update_term_raw(&mut self, index: usize, field: TermField, raw: &str) -> Result<()> {
        let update = TermUpdate::parse(field, raw)?;
        self.update_term(index, update)
    }

    fn recompile(&mut self) {
        self.formula = compile(&self.terms);
        for listener in self.listeners.iter_mut() {
            listener(&self.formula);
        }
    }
}

impl fmt::Debug for TermTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermTable")
            .field("variables", &self.variables)
            .field("terms", &self.terms)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn table() -> TermTable {
        TermTable::new(["age", "height_delta", "waitlist_days", "blood_group"]).unwrap()
    }

    #[test]
    fn rejects_empty_variable_set() {
        let result = TermTable::new(Vec::<String>::new());
        assert!(matches!(result, Err(PolicyError::InvalidInput { field: "variables", .. })));
    }

    #[test]
    fn add_appends_default_term() {
        let mut table = table();
        assert_eq!(table.add_term(), 0);
        assert_eq!(table.add_term(), 1);
        assert_eq!(table.term(1).unwrap().variable, "age");
        assert_eq!(table.formula().expression(), "1.0 * age + 1.0 * age");
    }

    #[test]
    fn remove_without_selection_is_noop() {
        let mut table = table();
        table.add_term();
        let before = table.formula().clone();
        assert!(table.remove_term(3).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.formula(), &before);
    }

    #[test]
    fn remove_shifts_following_rows() {
        let mut table = table();
        for _ in 0..3 {
            table.add_term();
        }
        table.update_term(2, TermUpdate::Variable("blood_group".into())).unwrap();
        let removed = table.remove_term(1).unwrap();
        assert_eq!(removed.variable, "age");
        assert_eq!(table.term(1).unwrap().variable, "blood_group");
    }

    #[test]
    fn coefficient_updates_are_clamped() {
        let mut table = table();
        table.add_term();
        table.update_term(0, TermUpdate::Coefficient(1500.0)).unwrap();
        assert_eq!(table.term(0).unwrap().coefficient, 1000.0);
        table.update_term(0, TermUpdate::Coefficient(-1500.0)).unwrap();
        assert_eq!(table.term(0).unwrap().coefficient, -1000.0);
    }

    #[test]
    fn unknown_variable_leaves_table_unchanged() {
        let mut table = table();
        table.add_term();
        let before = table.formula().clone();
        let err = table
            .update_term(0, TermUpdate::Variable("bmi".into()))
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownVariable { .. }));
        assert!(err.is_invalid_input());
        assert_eq!(table.formula(), &before);
        assert_eq!(table.term(0).unwrap().variable, "age");
    }

    #[test]
    fn update_out_of_range_fails() {
        let mut table = table();
        let err = table.update_term(0, TermUpdate::Operator(Operator::Add)).unwrap_err();
        assert!(matches!(err, PolicyError::IndexOutOfRange { index: 0, len: 0 }));
    }

    #[test]
    fn raw_updates_parse_cells() {
        let mut table = table();
        table.add_term();
        table.update_term_raw(0, "op".parse().unwrap(), "-").unwrap();
        table.update_term_raw(0, TermField::Coefficient, "2.5").unwrap();
        assert_eq!(table.formula().expression(), "2.5 - age");

        table.update_term_raw(0, TermField::Condition, "<").unwrap();
        table.update_term_raw(0, TermField::Comparison, "40").unwrap();
        assert_eq!(table.formula().expression(), "2.5 * (age < 40.0)");

        table.update_term_raw(0, TermField::Comparison, "").unwrap();
        assert_eq!(table.formula().expression(), "2.5 * (age < 'value')");

        assert!(table.update_term_raw(0, TermField::Operator, "%").is_err());
        assert!(table.update_term_raw(0, TermField::Coefficient, "lots").is_err());
    }

    #[test]
    fn listeners_see_every_recompile() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut table = table();
        table.on_recompile(move |formula| {
            sink.lock().unwrap().push(formula.expression().to_string());
        });

        table.add_term();
        table.update_term(0, TermUpdate::Coefficient(2.0)).unwrap();
        let _ = table.update_term(0, TermUpdate::Variable("nope".into()));
        table.remove_term(0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["1.0 * age", "2.0 * age", ""]);
    }
}
