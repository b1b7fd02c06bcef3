//! Statement-execution façade: column resolution for qualified/unqualified
//! references, and the auto-commit transaction envelope (§4.8, §4.10).

mod executor;
mod resolver;

pub use executor::Executor;
pub use resolver::{ColumnResolver, Resolved, TrackedTable};
