pub mod import;
pub mod reconcile;
pub mod schema;
pub mod search;
