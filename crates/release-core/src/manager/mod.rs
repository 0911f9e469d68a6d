//! Domain wiring of the rule engine for versions and variables.

pub mod variable;
pub mod version;

pub use variable::{VariableDecision, VariableManager};
pub use version::{VersionDecision, VersionManager};
