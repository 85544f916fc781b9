//! Locate the current coordinator of a group.

pub mod request;
pub mod response;
