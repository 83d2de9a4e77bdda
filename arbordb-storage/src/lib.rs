pub mod error;
pub mod hkey;
pub mod mem;
pub mod row;
pub mod rowtype;
pub mod store;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::hkey::*;
    pub use crate::row::*;
    pub use crate::rowtype::*;
    pub use crate::store::*;
}
