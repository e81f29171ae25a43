//! Runtime pieces shared by the bridge: the compact graph interpreter and
//! the SQLite message inbox.

pub mod model;
pub mod inbox;
