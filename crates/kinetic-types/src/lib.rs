pub mod payload;
pub mod task;
pub mod view;

pub use payload::*;
pub use task::*;
pub use view::*;
