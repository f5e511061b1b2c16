pub mod config;
pub mod events;
pub mod grant;
pub mod reconcile;
pub mod registry;
pub mod runner;
pub mod runtime;

pub use config::*;
pub use events::*;
pub use grant::*;
pub use reconcile::*;
pub use registry::*;
pub use runner::*;
pub use runtime::*;
