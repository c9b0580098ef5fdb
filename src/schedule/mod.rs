pub mod types;
pub mod time_window;
pub mod conflict;
pub mod queue;
pub mod engine;
pub mod slots;

pub use types::{Assignment, BatchResult, Preference, ReasonCode, Slot, Snapshot, Task, TaskRecord};
pub use time_window::TimeWindow;
pub use conflict::{CapacityCheck, ConflictChecker};
pub use queue::PreferenceQueue;
pub use engine::{allocate, Allocation, AllocationRun, Phase};
pub use slots::SlotAllocator;
