//! Read topic and broker configuration.
//!
//! The describe client asks for a fixed set of topic configs and
//! republishes them whenever they change, the group client uses the
//! broker configs to bound the session timeout it requests.

pub mod request;
pub mod response;
