pub mod atomic;

pub use atomic::{fsync_dir, TempTarget};
