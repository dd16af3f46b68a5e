pub mod context;
pub mod io;
pub mod sarray;
pub mod sframe;

pub use context::Context;
pub use sarray::{ArithOp, SArray};
pub use sframe::SFrame;
