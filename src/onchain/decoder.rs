//! Raw log → `ChainEvent` decoding against the event registry.
//!
//! Non-indexed parameters are decoded from the log data as one ABI tuple (head
//! words followed by tail segments). Indexed value types are decoded from their
//! topic word; indexed strings, bytes, arrays and structs only carry a hash and
//! are returned as `EventValue::Hashed`.

use crate::chain::RawLog;
use crate::onchain::abi::{canonical_type, EventRegistry, EventSignature};
use crate::onchain::types::{ChainEvent, EventValue};

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::json_abi::Param;
use alloy::primitives::B256;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log was removed by a reorg")]
    Removed,
    #[error("{event}: expected {expected} topics, got {actual}")]
    TopicCount {
        event: String,
        expected: usize,
        actual: usize,
    },
    #[error("{event}: invalid ABI type {ty}: {reason}")]
    Type {
        event: String,
        ty: String,
        reason: String,
    },
    #[error("{event}: malformed data: {reason}")]
    Data { event: String, reason: String },
    #[error("{event}: value does not match declared shape: {reason}")]
    Shape { event: String, reason: String },
    #[error("missing or mistyped field {0}")]
    MissingField(&'static str),
}

/// A parameter with its resolved ABI type.
#[derive(Debug, Clone)]
struct CompiledParam {
    name: String,
    ty: DynSolType,
    components: Vec<Param>,
}

#[derive(Debug, Clone)]
struct CompiledEvent {
    signature: EventSignature,
    /// Declared order: (is_indexed, param).
    params: Vec<(bool, CompiledParam)>,
    body: DynSolType,
}

impl CompiledEvent {
    fn compile(signature: &EventSignature) -> Result<Self, DecodeError> {
        let mut params = Vec::with_capacity(signature.event.inputs.len());
        let mut body = Vec::new();

        for input in &signature.event.inputs {
            let canonical = canonical_type(&input.ty, &input.components);
            let ty = DynSolType::parse(&canonical).map_err(|e| DecodeError::Type {
                event: signature.name.clone(),
                ty: canonical.clone(),
                reason: e.to_string(),
            })?;
            if !input.indexed {
                body.push(ty.clone());
            }
            params.push((
                input.indexed,
                CompiledParam {
                    name: input.name.clone(),
                    ty,
                    components: input.components.clone(),
                },
            ));
        }

        Ok(Self {
            signature: signature.clone(),
            params,
            body: DynSolType::Tuple(body),
        })
    }

    fn indexed_count(&self) -> usize {
        self.params.iter().filter(|(indexed, _)| *indexed).count()
    }
}

/// Decodes logs for every event in an `EventRegistry`.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    events: Vec<CompiledEvent>,
}

impl EventDecoder {
    pub fn new(registry: &EventRegistry) -> Result<Self, DecodeError> {
        let events = registry
            .iter()
            .map(CompiledEvent::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { events })
    }

    /// `Ok(None)` when the log is not one of ours.
    pub fn decode(&self, log: &RawLog) -> Result<Option<ChainEvent>, DecodeError> {
        let Some(topic0) = log.topic0() else {
            return Ok(None);
        };
        let Some(compiled) = self.events.iter().find(|e| e.signature.topic0 == *topic0) else {
            return Ok(None);
        };
        if log.removed {
            return Err(DecodeError::Removed);
        }

        let event_name = &compiled.signature.name;
        let expected = 1 + compiled.indexed_count();
        if log.topics.len() != expected {
            return Err(DecodeError::TopicCount {
                event: event_name.clone(),
                expected,
                actual: log.topics.len(),
            });
        }

        let body = compiled
            .body
            .abi_decode_sequence(&log.data)
            .map_err(|e| DecodeError::Data {
                event: event_name.clone(),
                reason: e.to_string(),
            })?;
        let DynSolValue::Tuple(body_values) = body else {
            return Err(DecodeError::Data {
                event: event_name.clone(),
                reason: "body did not decode to a tuple".to_string(),
            });
        };

        let mut body_values = body_values.into_iter();
        let mut topics = log.topics.iter().skip(1);
        let mut args = Vec::with_capacity(compiled.params.len());

        for (indexed, param) in &compiled.params {
            let value = if *indexed {
                let topic = topics.next().ok_or_else(|| DecodeError::TopicCount {
                    event: event_name.clone(),
                    expected,
                    actual: log.topics.len(),
                })?;
                decode_topic(event_name, param, topic)?
            } else {
                let raw = body_values.next().ok_or_else(|| DecodeError::Data {
                    event: event_name.clone(),
                    reason: format!("missing value for {}", param.name),
                })?;
                to_event_value(event_name, raw, &param.components)?
            };
            args.push((param.name.clone(), value));
        }

        Ok(Some(ChainEvent {
            name: event_name.clone(),
            contract_address: log.address,
            block_number: log.block_number,
            log_index: log.log_index,
            tx_hash: log.tx_hash,
            args,
        }))
    }
}

/// Reference types are stored in topics as keccak256 of their encoding.
fn is_hashed_when_indexed(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_)
    )
}

fn decode_topic(event: &str, param: &CompiledParam, topic: &B256) -> Result<EventValue, DecodeError> {
    if is_hashed_when_indexed(&param.ty) {
        return Ok(EventValue::Hashed(*topic));
    }
    let value = param
        .ty
        .abi_decode(topic.as_slice())
        .map_err(|e| DecodeError::Data {
            event: event.to_string(),
            reason: format!("indexed {}: {e}", param.name),
        })?;
    to_event_value(event, value, &param.components)
}

fn to_event_value(
    event: &str,
    value: DynSolValue,
    components: &[Param],
) -> Result<EventValue, DecodeError> {
    Ok(match value {
        DynSolValue::Bool(b) => EventValue::Bool(b),
        DynSolValue::Uint(v, bits) => EventValue::Uint(v, bits),
        DynSolValue::Int(v, bits) => EventValue::Int(v, bits),
        DynSolValue::Address(a) => EventValue::Address(a),
        DynSolValue::FixedBytes(word, size) => EventValue::FixedBytes(word, size),
        DynSolValue::Bytes(bytes) => EventValue::Bytes(bytes),
        DynSolValue::String(s) => EventValue::String(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => EventValue::Array(
            items
                .into_iter()
                .map(|item| to_event_value(event, item, components))
                .collect::<Result<_, _>>()?,
        ),
        DynSolValue::Tuple(items) => {
            if items.len() != components.len() {
                return Err(DecodeError::Shape {
                    event: event.to_string(),
                    reason: format!(
                        "tuple has {} values but {} components",
                        items.len(),
                        components.len()
                    ),
                });
            }
            EventValue::Tuple(
                components
                    .iter()
                    .zip(items)
                    .map(|(component, item)| {
                        Ok((
                            component.name.clone(),
                            to_event_value(event, item, &component.components)?,
                        ))
                    })
                    .collect::<Result<_, DecodeError>>()?,
            )
        }
        other => {
            return Err(DecodeError::Shape {
                event: event.to_string(),
                reason: format!("unsupported value {other:?}"),
            })
        }
    })
}
