mod lab;
mod plan;
mod run;
mod topology;
mod vlan;

pub use lab::*;
pub use plan::*;
pub use run::*;
pub use topology::*;
pub use vlan::*;
