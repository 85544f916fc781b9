//! # Kafka gateway
//! Flow-controlled streams in, Kafka wire protocol out.
//!
//! Applications open typed streams (fetch one partition, produce to one
//! partition, follow a topic's metadata, describe its configs, take part in
//! a consumer group, or read and write a whole topic as one merged stream)
//! and the gateway turns each into Kafka requests on a broker connection,
//! decoding the responses back into frames. Every byte moved in either
//! direction is accounted for by the window the receiver granted.
//!
//! ## Goals
//! - Decoders that resume at any byte boundary, so a response may arrive
//!   in pieces of any size
//! - Records larger than one buffer slot, sent and received in fragments
//! - Recovery from Kafka error codes without involving the application
//! - A synchronous protocol core with sockets kept at the edge
//!
//! ## Table of contents
//! - [Getting started](#getting-started)
//! - [Modules](#modules)
//! - [Resources](#resources)
//!
//! ## Getting started
//! Build an [`Engine`](engine::Engine), register the Kafka binding under its
//! id and a network factory under the id the binding routes to. The
//! [`TcpDriver`](network::tcp::TcpDriver) provides sockets.
//! ```rust,no_run
//! use kafka_gateway::{
//!     binding::{KafkaBinding, KafkaRoute},
//!     client::KafkaClientFactory,
//!     config::GatewayConfig,
//!     engine::Engine,
//!     network::tcp::TcpDriver,
//! };
//!
//! # async fn serve() -> kafka_gateway::error::Result<()> {
//! let config = GatewayConfig::builder().client_id("gateway").build();
//! let binding = KafkaBinding::new(1).route(KafkaRoute::new(2).topic("orders-*"));
//!
//! let mut engine = Engine::new(config.clone());
//! engine.register(1, Box::new(KafkaClientFactory::new(binding, &config)));
//!
//! let mut driver = TcpDriver::new();
//! engine.register(2, Box::new(driver.factory("127.0.0.1:9092")));
//! driver.run(&mut engine).await
//! # }
//! ```
//!
//! ## Modules
//! - [`stream`] frames, flow control and the typed extensions
//! - [`engine`] frame dispatch, buffer slots, budgets and timers
//! - [`client`] one protocol driver per stream kind
//! - [`merged`] one stream for a whole topic
//! - [`protocol`] request encoders and response views
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [Confluence Docs](https://cwiki.apache.org/confluence/display/KAFKA/A+Guide+To+The+Kafka+Protocol)

pub mod binding;
pub mod client;
pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod merged;
pub mod network;
pub mod parser;
pub mod partitioner;
pub mod protocol;
pub mod stream;
pub mod utils;
