pub mod addrset;
pub mod endpoint;
pub mod identity;
pub mod protocol;
pub mod types;
