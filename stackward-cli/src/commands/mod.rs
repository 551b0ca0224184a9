pub mod apply;
pub mod plan;
pub mod rm;

use colored::Colorize;
use stackward_core::StackError;

/// Print a failure summary line the way every subcommand does.
pub(crate) fn report_error(err: &StackError) {
    eprintln!("{} {}", "✗".red().bold(), err);
}
