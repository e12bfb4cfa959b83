//! Message-queue backends.
//!
//! # Responsibilities
//! - Replace the HTTP call of a backend with a publish (producer) or a
//!   single-message consume (consumer)
//! - Declare consumer queues when the pipeline is built
//!
//! # Design Decisions
//! - A backend configuring both namespaces is treated as a consumer
//! - Consumers are bound to the root context as well as the call context,
//!   so shutting the gateway down releases waiting consumers
//! - Consumed messages are decoded with the backend's own encoding

mod broker;

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{self, header};
use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::config::BackendConfig;
use crate::pipeline::BackendLayer;
use crate::proxy::encoding::Decoder;
use crate::proxy::formatter::EntityFormatter;
use crate::proxy::parser::ResponseParser;
use crate::proxy::{Context, Metadata, Proxy, ProxyError, ProxyRef, Request, Response};

pub use broker::{BrokerRef, InMemoryBroker, Message, MessageBroker, QueueError, WILDCARD};

pub const CONSUMER_NAMESPACE: &str = "backend/amqp/consumer";
pub const PRODUCER_NAMESPACE: &str = "backend/amqp/producer";

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Queue name.
    pub name: String,
    pub exchange: String,
    #[serde(default = "default_routing_keys")]
    pub routing_key: Vec<String>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    /// Request param overriding `routing_key` when present.
    #[serde(default)]
    pub routing_key_param: Option<String>,
}

fn default_routing_keys() -> Vec<String> {
    vec![WILDCARD.to_string()]
}

fn default_capacity() -> usize {
    64
}

/// Pipeline layer swapping the HTTP backend for a queue backend.
pub struct AmqpLayer {
    root: Context,
    broker: BrokerRef,
}

impl AmqpLayer {
    pub fn new(root: Context, broker: BrokerRef) -> Self {
        Self { root, broker }
    }

    fn consumer(
        &self,
        remote: &BackendConfig,
        config: ConsumerConfig,
    ) -> Result<ProxyRef, QueueError> {
        self.broker.declare_queue(
            &config.name,
            &config.exchange,
            &config.routing_key,
            config.capacity,
        )?;

        let parser = match Decoder::from_encoding(&remote.encoding) {
            Some(Decoder::NoOp) | None => ResponseParser::noop(),
            Some(decoder) => {
                ResponseParser::new(decoder, EntityFormatter::new(remote), remote.is_collection)
            }
        };

        Ok(Arc::new(ConsumerProxy {
            root: self.root.clone(),
            broker: self.broker.clone(),
            queue: config.name,
            parser,
        }))
    }
}

impl BackendLayer for AmqpLayer {
    fn name(&self) -> &'static str {
        "amqp"
    }

    fn is_active(&self, remote: &BackendConfig) -> bool {
        remote.has_namespace(CONSUMER_NAMESPACE) || remote.has_namespace(PRODUCER_NAMESPACE)
    }

    fn wrap(&self, remote: &BackendConfig, next: ProxyRef) -> ProxyRef {
        if let Some(raw) = remote.extra_config.get(CONSUMER_NAMESPACE) {
            let built = serde_json::from_value::<ConsumerConfig>(raw.clone())
                .map_err(|e| e.to_string())
                .and_then(|config| self.consumer(remote, config).map_err(|e| e.to_string()));
            return match built {
                Ok(proxy) => proxy,
                Err(error) => {
                    tracing::error!(
                        backend = %remote.name,
                        %error,
                        "Invalid amqp consumer config, layer disabled"
                    );
                    next
                }
            };
        }

        let Some(raw) = remote.extra_config.get(PRODUCER_NAMESPACE) else {
            return next;
        };
        match serde_json::from_value::<ProducerConfig>(raw.clone()) {
            Ok(config) => Arc::new(ProducerProxy {
                broker: self.broker.clone(),
                config,
            }),
            Err(error) => {
                tracing::error!(
                    backend = %remote.name,
                    %error,
                    "Invalid amqp producer config, layer disabled"
                );
                next
            }
        }
    }
}

struct ConsumerProxy {
    root: Context,
    broker: BrokerRef,
    queue: String,
    parser: ResponseParser,
}

impl Proxy for ConsumerProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        _request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            let consume = async {
                self.broker
                    .consume(&self.queue)
                    .await
                    .map_err(ProxyError::from)
            };
            let message = self.root.run(ctx.run(consume)).await?;

            let mut upstream = http::Response::new(message.body);
            if let Some(value) = message
                .content_type
                .and_then(|ct| http::HeaderValue::from_str(&ct).ok())
            {
                upstream.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            self.parser.parse(upstream)
        })
    }
}

struct ProducerProxy {
    broker: BrokerRef,
    config: ProducerConfig,
}

impl ProducerProxy {
    fn routing_key<'r>(&'r self, request: &'r Request) -> &'r str {
        self.config
            .routing_key_param
            .as_ref()
            .and_then(|param| request.params.get(param))
            .map_or(self.config.routing_key.as_str(), String::as_str)
    }
}

impl Proxy for ProducerProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            let content_type = request
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let message = Message::new(
                self.routing_key(&request),
                content_type,
                request.body.clone(),
            );
            let id = message.id;

            let publish = async {
                self.broker
                    .publish(&self.config.exchange, message)
                    .await
                    .map_err(ProxyError::from)
            };
            let delivered = ctx.run(publish).await?;
            tracing::debug!(
                exchange = %self.config.exchange,
                message_id = %id,
                delivered,
                "Message published"
            );

            Ok(Response {
                is_complete: true,
                metadata: Metadata {
                    status_code: http::StatusCode::OK.as_u16(),
                    headers: Default::default(),
                },
                body: Some(Bytes::new()),
                ..Default::default()
            })
        })
    }
}
