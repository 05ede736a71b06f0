mod events;
mod sources;
mod specs;

pub use events::*;
pub use sources::*;
pub use specs::*;
