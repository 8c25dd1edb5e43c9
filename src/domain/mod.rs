pub mod account;
pub mod ids;
pub mod instrument;
pub mod money;
pub mod order;

pub use account::*;
pub use ids::*;
pub use instrument::*;
pub use money::*;
pub use order::*;
