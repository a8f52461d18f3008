//! On-disk encodings of a trained dense model.
//!
//! * `json`: a single self-describing document holding the architecture and
//!   every tensor.
//! * `bin`: `MLUI` magic, `u32` format version, `u32` descriptor length, the
//!   architecture descriptor as JSON, `u64` value count, then every tensor
//!   value as a little-endian `f64`. All integers are little-endian.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::backend::dense::network::Network;
use crate::backend::dense::TrainedDense;
use crate::backend::BackendError;
use crate::model::{CompileConfig, ModelSpec};

pub const MAGIC: &[u8; 4] = b"MLUI";
pub const FORMAT_VERSION: u32 = 1;
const BACKEND_TAG: &str = "dense";

#[derive(Serialize)]
struct JsonDocumentRef<'a> {
    format_version: u32,
    backend: &'a str,
    spec: &'a ModelSpec,
    compile: &'a CompileConfig,
    network: &'a Network,
}

#[derive(Deserialize)]
struct JsonDocument {
    format_version: u32,
    backend: String,
    spec: ModelSpec,
    compile: CompileConfig,
    network: Network,
}

#[derive(Serialize, Deserialize)]
struct Descriptor {
    backend: String,
    spec: ModelSpec,
    compile: CompileConfig,
}

fn ser_err(e: impl std::fmt::Display) -> BackendError {
    BackendError::Serialization(e.to_string())
}

/// Rebuild an untrained network with the architecture's shapes.
fn template(spec: &ModelSpec) -> Result<Network, BackendError> {
    spec.validate().map_err(ser_err)?;
    Ok(Network::from_spec(spec, &mut Xoshiro256PlusPlus::seed_from_u64(0)))
}

fn check_header(backend: &str, version: u32) -> Result<(), BackendError> {
    if backend != BACKEND_TAG {
        return Err(BackendError::Serialization(format!(
            "artifact was written by backend `{backend}`"
        )));
    }
    if version != FORMAT_VERSION {
        return Err(BackendError::Serialization(format!(
            "unsupported format version {version}"
        )));
    }
    Ok(())
}

pub fn encode_json(model: &TrainedDense) -> Result<Vec<u8>, BackendError> {
    serde_json::to_vec_pretty(&JsonDocumentRef {
        format_version: FORMAT_VERSION,
        backend: BACKEND_TAG,
        spec: &model.spec,
        compile: &model.config,
        network: &model.network,
    })
    .map_err(ser_err)
}

pub fn decode_json(bytes: &[u8]) -> Result<TrainedDense, BackendError> {
    let doc: JsonDocument = serde_json::from_slice(bytes).map_err(ser_err)?;
    check_header(&doc.backend, doc.format_version)?;
    doc.network.check_layout(&template(&doc.spec)?)?;
    Ok(TrainedDense {
        spec: doc.spec,
        config: doc.compile,
        network: doc.network,
    })
}

pub fn encode_bin(model: &TrainedDense) -> Result<Vec<u8>, BackendError> {
    let descriptor = serde_json::to_vec(&Descriptor {
        backend: BACKEND_TAG.to_string(),
        spec: model.spec.clone(),
        compile: model.config.clone(),
    })
    .map_err(ser_err)?;
    let descriptor_len = u32::try_from(descriptor.len())
        .map_err(|_| BackendError::Serialization("architecture descriptor too large".into()))?;

    let tensors = model.network.state_tensors();
    let count: usize = tensors.iter().map(|t| t.len()).sum();

    let mut out = Vec::with_capacity(4 + 4 + 4 + descriptor.len() + 8 + count * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&descriptor_len.to_le_bytes());
    out.extend_from_slice(&descriptor);
    out.extend_from_slice(&(count as u64).to_le_bytes());
    for tensor in tensors {
        for value in tensor.iter() {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BackendError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| BackendError::Serialization("artifact is truncated".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BackendError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32, BackendError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, BackendError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, BackendError> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

pub fn decode_bin(bytes: &[u8]) -> Result<TrainedDense, BackendError> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4)? != MAGIC {
        return Err(BackendError::Serialization("missing MLUI header".into()));
    }
    let version = reader.u32()?;
    let descriptor_len = reader.u32()? as usize;
    let descriptor: Descriptor =
        serde_json::from_slice(reader.take(descriptor_len)?).map_err(ser_err)?;
    check_header(&descriptor.backend, version)?;

    let mut network = template(&descriptor.spec)?;
    let expected: usize = network.state_tensors().iter().map(|t| t.len()).sum();
    let count = reader.u64()?;
    if count != expected as u64 {
        return Err(BackendError::Serialization(format!(
            "artifact holds {count} weight value(s), architecture needs {expected}"
        )));
    }
    for tensor in network.state_tensors_mut() {
        for value in tensor.iter_mut() {
            *value = reader.f64()?;
        }
    }
    if reader.pos != bytes.len() {
        return Err(BackendError::Serialization(
            "trailing bytes after weights".into(),
        ));
    }

    Ok(TrainedDense {
        spec: descriptor.spec,
        config: descriptor.compile,
        network,
    })
}
