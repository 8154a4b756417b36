pub mod label;
pub mod region;
pub mod table;

pub use label::*;
pub use region::*;
pub use table::*;
