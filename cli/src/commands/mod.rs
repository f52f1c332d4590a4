//! CLI command implementations.

mod ctl;
mod info;
mod run;

pub use ctl::{get, get_all, refresh, set};
pub use info::show_info;
pub use run::{run_central, run_peripheral};
