pub mod context;
pub mod password;

pub use context::{Actor, RequestContext};
pub use password::{hash_password, verify_password};
