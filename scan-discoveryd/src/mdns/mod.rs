mod ifindex;
pub mod transport;

pub use self::transport::{MdnsSettings, MdnsTransport};
