//! Ready-made stages for common cross-cutting behavior.

mod defaults;
mod paginate;
mod read_only;
mod timestamps;

pub use defaults::Defaults;
pub use paginate::Paginate;
pub use read_only::ReadOnly;
pub use timestamps::Timestamps;
