pub mod config;
pub mod logging;

pub mod adapter;
pub mod batch;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod retry;
pub mod selector;
pub mod target;
pub mod task;

pub use engine::Engine;
pub use error::EngineError;

/// Lock a std mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent between
/// statements, so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
