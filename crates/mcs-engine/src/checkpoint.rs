use std::any::type_name;
use std::fs;
use std::path::Path;

use mcs_core::errors::ErrorInfo;
use mcs_core::{Configuration, McError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entropic::EntropicSampling;
use crate::metropolis::Metropolis;
use crate::tempering::ParallelTempering;
use crate::wang_landau::WangLandau;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    kind: &'a str,
    configuration_type: &'a str,
    state: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    kind: String,
    configuration_type: String,
    state: serde_json::Value,
}

/// Engine state persisted as a JSON document
/// `{ "kind", "configuration_type", "state" }`.
///
/// Loading verifies both the engine kind and the configuration type name
/// before decoding the state. Callbacks and the cancellation token are not
/// persisted; a loaded engine starts with none installed and a fresh token.
pub trait Checkpoint: Serialize + DeserializeOwned {
    /// Engine discriminator written to the header.
    const KIND: &'static str;

    /// Type name of the sampled configuration.
    fn configuration_type() -> &'static str;

    /// Encodes the engine with its header.
    fn to_bytes(&self) -> Result<Vec<u8>, McError> {
        let envelope = EnvelopeRef {
            kind: Self::KIND,
            configuration_type: Self::configuration_type(),
            state: self,
        };
        serde_json::to_vec_pretty(&envelope).map_err(|err| {
            McError::Serde(
                ErrorInfo::new("checkpoint-serialize", err.to_string())
                    .with_context("kind", Self::KIND),
            )
        })
    }

    /// Decodes an engine, rejecting checkpoints written by another engine
    /// kind or for another configuration type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, McError> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(|err| {
            McError::Serde(ErrorInfo::new("checkpoint-parse", err.to_string()))
        })?;
        if envelope.kind != Self::KIND
            || envelope.configuration_type != Self::configuration_type()
        {
            return Err(McError::Checkpoint(
                ErrorInfo::new(
                    "checkpoint-type-mismatch",
                    "checkpoint was written for a different engine or configuration",
                )
                .with_context("expected_kind", Self::KIND)
                .with_context("found_kind", envelope.kind)
                .with_context("expected_configuration", Self::configuration_type())
                .with_context("found_configuration", envelope.configuration_type),
            ));
        }
        serde_json::from_value(envelope.state).map_err(|err| {
            McError::Serde(
                ErrorInfo::new("checkpoint-state", err.to_string())
                    .with_context("kind", Self::KIND),
            )
        })
    }

    /// Writes the checkpoint to `path`, creating parent directories.
    fn store(&self, path: &Path) -> Result<(), McError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| McError::io("checkpoint-mkdir", err, parent))?;
        }
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).map_err(|err| McError::io("checkpoint-write", err, path))
    }

    /// Reads a checkpoint from `path`.
    fn load(path: &Path) -> Result<Self, McError> {
        let bytes = fs::read(path).map_err(|err| McError::io("checkpoint-read", err, path))?;
        Self::from_bytes(&bytes).map_err(|err| match err {
            McError::Serde(info) => {
                McError::Serde(info.with_context("path", path.display().to_string()))
            }
            other => other,
        })
    }
}

impl<C> Checkpoint for Metropolis<C>
where
    C: Configuration + Serialize + DeserializeOwned,
{
    const KIND: &'static str = "metropolis";

    fn configuration_type() -> &'static str {
        type_name::<C>()
    }
}

impl<C> Checkpoint for WangLandau<C>
where
    C: Configuration + Serialize + DeserializeOwned,
{
    const KIND: &'static str = "wang-landau";

    fn configuration_type() -> &'static str {
        type_name::<C>()
    }
}

impl<C> Checkpoint for ParallelTempering<C>
where
    C: Configuration + Serialize + DeserializeOwned,
{
    const KIND: &'static str = "parallel-tempering";

    fn configuration_type() -> &'static str {
        type_name::<C>()
    }
}

impl<C> Checkpoint for EntropicSampling<C>
where
    C: Configuration + Serialize + DeserializeOwned,
{
    const KIND: &'static str = "entropic-sampling";

    fn configuration_type() -> &'static str {
        type_name::<C>()
    }
}
