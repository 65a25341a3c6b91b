mod dev;
mod generate;
mod ports;

pub use dev::run_dev;
pub use generate::run_generate;
pub use ports::run_ports;
