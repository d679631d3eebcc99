//! Claims range tasks from the workspace and bulk-copies their source
//! documents into the target cluster (§4.3/§4.4).

pub mod copy;
pub mod error;
pub mod pool;

pub use copy::copy_data;
pub use error::CopyError;
pub use pool::run_worker;
