// Declare submodules
mod analysis;
mod common;
mod report;

pub use analysis::{analysis_prompt, analysis_system_prompt};
pub use common::*;
pub use report::{report_prompt, report_system_prompt};
