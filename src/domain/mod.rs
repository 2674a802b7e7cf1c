pub mod effects;
pub mod events;
pub mod funding;
pub mod intent;

pub use effects::*;
pub use events::*;
pub use funding::*;
pub use intent::*;
