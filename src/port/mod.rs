pub mod allocator;
pub mod sweep;

pub use allocator::{find_free, is_bound, wait_ready, PortAssignment};
pub use sweep::{listening_pids, sweep_ports};
