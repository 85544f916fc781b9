//! Encoding and creation for Describe Configs requests.
//!
//! ### Example
//! ```rust
//! use kafka_gateway::protocol::{describe_configs::request::Resource, DescribeConfigsRequest};
//!
//! let configs = ["cleanup.policy", "max.message.bytes"];
//! let describe = DescribeConfigsRequest::new(
//!     1,
//!     "relay",
//!     vec![Resource::topic("purchases", &configs)],
//! );
//! ```
//!
//! ### Protocol Def
//! ```text
//! DescribeConfigs Request (Version: 0) => [resources]
//!   resources => resource_type resource_name [configuration_keys]
//!     resource_type => INT8
//!     resource_name => STRING
//!     configuration_keys => STRING
//! ```
//!
//! Note we are using version 0 of the request.

use bytes::BufMut;

use crate::{
    encode::{AsStrings, ToByte},
    error::Result,
    protocol::HeaderRequest,
};

const API_KEY_DESCRIBE_CONFIGS: i16 = 32;
const API_VERSION: i16 = 0;

pub const RESOURCE_TYPE_TOPIC: i8 = 2;
pub const RESOURCE_TYPE_BROKER: i8 = 4;

#[derive(Debug)]
pub struct DescribeConfigsRequest<'a> {
    pub header: HeaderRequest<'a>,
    pub resources: Vec<Resource<'a>>,
}

#[derive(Debug)]
pub struct Resource<'a> {
    pub resource_type: i8,
    pub resource_name: &'a str,
    /// The configuration keys to list.
    pub configuration_keys: &'a [&'a str],
}

impl<'a> Resource<'a> {
    pub fn topic(name: &'a str, configuration_keys: &'a [&'a str]) -> Self {
        Resource {
            resource_type: RESOURCE_TYPE_TOPIC,
            resource_name: name,
            configuration_keys,
        }
    }

    pub fn broker(node_id: &'a str, configuration_keys: &'a [&'a str]) -> Self {
        Resource {
            resource_type: RESOURCE_TYPE_BROKER,
            resource_name: node_id,
            configuration_keys,
        }
    }
}

impl<'a> DescribeConfigsRequest<'a> {
    pub fn new(correlation_id: i32, client_id: &'a str, resources: Vec<Resource<'a>>) -> Self {
        let header =
            HeaderRequest::new(API_KEY_DESCRIBE_CONFIGS, API_VERSION, correlation_id, client_id);
        Self { header, resources }
    }
}

impl<'a> ToByte for DescribeConfigsRequest<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        tracing::trace!("Encoding DescribeConfigsRequest {:?}", self);
        self.header.encode(buffer)?;
        self.resources.encode(buffer)?;
        Ok(())
    }
}

impl<'a> ToByte for Resource<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.resource_type.encode(buffer)?;
        self.resource_name.encode(buffer)?;
        AsStrings(self.configuration_keys).encode(buffer)?;
        Ok(())
    }
}
