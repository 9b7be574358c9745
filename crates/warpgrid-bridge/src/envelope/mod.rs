//! Message envelope codec: host `Request`/`Response`/`Headers` objects to
//! bridge-native types and back.

mod body;
mod header;
mod request;
mod response;
pub mod status;

pub use body::Body;
pub use header::{canonical_name, split_values, Header, HeaderMap};
pub use request::Request;
pub use response::Response;
