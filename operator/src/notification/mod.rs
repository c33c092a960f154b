mod actions;
pub mod circuit;
pub mod delivery;
pub mod emit;
mod reconcile;
pub mod sanitize;

pub use reconcile::run;
