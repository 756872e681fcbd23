pub mod actions;
pub mod events;
pub mod references;
pub mod work;
