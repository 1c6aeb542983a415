pub mod identity;
pub mod mapper;
pub mod router;
pub mod sanitize;

pub use identity::derive_id;
pub use mapper::{Mapper, DEFAULT_EXCLUDED_PATH};
pub use router::{RouteCache, Router, DEFAULT_TABLE_PATTERN};
pub use sanitize::{sanitize, RESERVED_FIELDS};
