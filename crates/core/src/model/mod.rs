pub mod flow;
pub mod service_map;
pub mod span;
