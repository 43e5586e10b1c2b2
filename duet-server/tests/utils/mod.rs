
pub use relay_server::*;
