pub mod session;

pub use session::{create_session, ensure_user, lookup_session};
