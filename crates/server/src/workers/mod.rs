//! Long-lived background workers: lifecycle enforcement and blob GC.

pub mod gc;
pub mod lifecycle;

pub use gc::GcWorker;
pub use lifecycle::LifecycleWorker;
