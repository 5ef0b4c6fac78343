pub mod colors;
pub mod events;
pub mod geo;
pub mod spot;
pub mod view;

pub use colors::marker_color;
pub use events::*;
pub use geo::*;
pub use spot::*;
pub use view::*;
