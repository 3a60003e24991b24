//! Terminal output helpers shared by the commands.
//!
//! Colors come from `owo-colors`, tables from `comfy-table` and progress
//! from `indicatif`, so every command renders the same way.

mod headers;
mod output;
mod progress;
mod status;
mod tables;

pub use headers::{print_section_header, SectionStyle};
pub use output::{format_duration, print_key_value, print_separator_with_spacing, print_summary_box};
pub use progress::create_progress_bar;
pub use status::{print_error, print_success, print_warning, Status};
pub use tables::{print_node_list, print_node_table, print_results_table};
