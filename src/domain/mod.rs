pub mod member;
pub mod fee;
pub mod payment;

pub use member::*;
pub use fee::*;
pub use payment::*;
