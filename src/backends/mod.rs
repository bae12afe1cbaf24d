//! Backend bookkeeping: identity, throttle state and weighted selection
//!
//! Everything here is synchronous and free of I/O; the dispatcher drives it.

pub mod backend_name;
pub mod selector;
pub mod throttle;

pub use backend_name::BackendName;
pub use selector::{SelectionError, select, select_with};
pub use throttle::{ThrottleRecord, ThrottleState, ThrottleStore};
