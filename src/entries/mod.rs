//! Entries and the variables derived from them.

mod entry;
mod sanitize;
mod variables;

pub use entry::{Chapter, Entry};
pub use sanitize::{escape_braces, sanitize_filename, truncate_to_bytes};
pub use variables::{
    VariableKind, entry_variable_kinds, entry_variable_names, entry_variables,
    with_sanitized_names,
};
