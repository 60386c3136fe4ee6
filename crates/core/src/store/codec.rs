use crate::err::Error;
use crate::val::Object;

/// The record payload serialization seam.
///
/// Payload bytes are opaque to the record layer: only the codec the
/// store was opened with ever interprets them. Swapping the codec on an
/// existing store requires rewriting every record.
pub trait RecordCodec: Send + Sync {
	fn serialize(&self, record: &Object) -> Result<Vec<u8>, Error>;
	fn deserialize(&self, bytes: &[u8]) -> Result<Object, Error>;
}

/// The default codec
#[derive(Default, Debug, Clone, Copy)]
pub struct BincodeCodec;

impl RecordCodec for BincodeCodec {
	fn serialize(&self, record: &Object) -> Result<Vec<u8>, Error> {
		Ok(bincode::serialize(record)?)
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<Object, Error> {
		Ok(bincode::deserialize(bytes)?)
	}
}
