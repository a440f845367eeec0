//! Building blocks for transplant allocation policy studies.
//!
//! The crate centres on the policy builder: an ordered table of terms
//! (coefficient, operator, variable, optional condition) that compiles into
//! the source of an allocation scoring function. Around it sit the pieces a
//! host application needs to run studies with that policy:
//!
//! - term rows and their value domains (`term` module),
//! - the editable term table with live recompilation (`table` module),
//! - the formula compiler (`formulation` module),
//! - the policy catalog loaded from YAML (`policy` module),
//! - run configuration (`options` module), and
//! - background simulation runs against an external engine (`simulation` module).
//!
//! The allocation simulator itself is not part of this crate; engines plug in
//! through [`SimulationEngine`].
//!
//! # Quick start
//!
//! ```
//! use transplant_policy::{TermTable, TermUpdate, Operator};
//!
//! let mut table = TermTable::new(["age", "height_delta", "waitlist_days", "blood_group"])
//!     .expect("non-empty variable set");
//!
//! let first = table.add_term();
//! table.update_term(first, TermUpdate::Coefficient(2.0)).unwrap();
//!
//! let second = table.add_term();
//! table.update_term(second, TermUpdate::Operator(Operator::Subtract)).unwrap();
//! table
//!     .update_term(second, TermUpdate::Variable("waitlist_days".into()))
//!     .unwrap();
//!
//! assert_eq!(table.formula().expression(), "2.0 * age + 1.0 - waitlist_days");
//! ```
//!
//! Running the smoke-test engine in the background:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use transplant_policy::{SimulationOptions, SimulationRunner, SmokeTestEngine};
//!
//! let runner = SimulationRunner::new(Arc::new(SmokeTestEngine::new(Duration::from_millis(500))));
//! let handle = runner
//!     .spawn(SimulationOptions::default().with_years(20))
//!     .expect("valid options");
//! for event in handle.progress().iter() {
//!     println!("{}", event.message);
//! }
//! let report = handle.wait().expect("completed run");
//! println!("Avg transplants: {}", report.avg_transplants);
//! ```

pub mod error;
pub mod formulation;
pub mod options;
pub mod policy;
pub mod simulation;
pub mod table;
pub mod term;

pub use error::{PolicyError, Result};
pub use formulation::{compile, GeneratedFormula};
pub use options::SimulationOptions;
pub use policy::{PolicyCatalog, PolicyDefinition, PolicySelection};
pub use simulation::{
    ProgressEvent, ReplicateContext, ReplicateMetrics, SimulationEngine, SimulationHandle,
    SimulationReport, SimulationRunner, SmokeTestEngine,
};
pub use table::{TermField, TermTable, TermUpdate};
pub use term::{Condition, Operator, Term};
