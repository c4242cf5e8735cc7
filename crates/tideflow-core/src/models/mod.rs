pub mod activity_manager;
pub mod filters;
pub mod process;
pub mod process_state;
pub mod status;
pub mod timer;
pub mod workflow;

pub use activity_manager::*;
pub use filters::*;
pub use process::*;
pub use process_state::*;
pub use status::*;
pub use timer::*;
pub use workflow::*;
