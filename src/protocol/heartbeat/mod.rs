//! Keep a member alive in the group.

pub mod request;
pub mod response;
