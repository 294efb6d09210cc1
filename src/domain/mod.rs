pub mod decision;
pub mod market;
pub mod model;
pub mod position;
pub mod record;

pub use decision::*;
pub use market::*;
pub use model::*;
pub use position::*;
pub use record::*;
