//! An order-preserving binary encoding for typed value sequences.
//!
//! Each element is encoded as one type tag byte followed by a
//! self-delimiting body, so concatenated element encodings can be streamed
//! back out without outer framing. The encoding is bijective and preserves
//! order: for any two tuples `a` and `b`, `a < b` in canonical value order
//! exactly when `pack(a) < pack(b)` in byte order.
//!
//! Two forms exist and must not be mixed. *Flat* packing concatenates
//! element encodings side by side and is used for index and metadata keys,
//! where range scans over a value prefix must see every entry below it.
//! *Nested* encoding wraps a tuple in a `0x05 … 0x00` frame and is used to
//! derive hierarchical namespaces, where each nesting level must be
//! self-delimited against its siblings. Using the nested form at an index
//! boundary inserts a frame byte into the key and silently breaks prefix
//! scans, which is why the two forms are only reachable through distinct
//! key builders in [`crate::key`].

use crate::err::Error;
use crate::val::{Array, Value};
use crate::vs::Versionstamp;
use uuid::Uuid;

mod decode;

pub use decode::unpack;
pub(crate) use decode::decode_element;

// Type tag bytes
pub(crate) const NIL: u8 = 0x00;
pub(crate) const BYTES: u8 = 0x01;
pub(crate) const STRING: u8 = 0x02;
pub(crate) const NESTED: u8 = 0x05;
pub(crate) const INT_ZERO: u8 = 0x14;
pub(crate) const FLOAT32: u8 = 0x20;
pub(crate) const FLOAT64: u8 = 0x21;
pub(crate) const FALSE: u8 = 0x26;
pub(crate) const TRUE: u8 = 0x27;
pub(crate) const UUID: u8 = 0x30;
pub(crate) const VERSIONSTAMP: u8 = 0x33;
pub(crate) const ESCAPE: u8 = 0xff;

/// Encodes a sequence of values side by side, with no outer framing.
///
/// Fails if any value contains an incomplete versionstamp; those are only
/// meaningful through [`pack_with_versionstamp`].
pub fn pack(values: &[Value]) -> Result<Vec<u8>, Error> {
	let (bytes, offset) = pack_with_versionstamp(values)?;
	if offset.is_some() {
		return Err(Error::Encode(
			"incomplete versionstamp in a key that is not versionstamped".to_string(),
		));
	}
	Ok(bytes)
}

/// Encodes a sequence of values, permitting at most one incomplete
/// versionstamp. Returns the encoded bytes and, when an incomplete
/// versionstamp was present, the byte offset of its 12-byte body so the
/// caller can issue a versionstamped-key mutation.
pub fn pack_with_versionstamp(values: &[Value]) -> Result<(Vec<u8>, Option<u32>), Error> {
	let mut buf = Vec::with_capacity(values.len() * 8);
	let mut offset = None;
	for v in values {
		encode_element(&mut buf, v, &mut offset)?;
	}
	Ok((buf, offset))
}

/// Encodes a tuple in the nested `0x05 … 0x00` frame, for namespace
/// derivation. Incomplete versionstamps are rejected.
pub(crate) fn pack_nested(values: &[Value]) -> Result<Vec<u8>, Error> {
	let mut buf = Vec::with_capacity(values.len() * 8 + 2);
	let mut offset = None;
	buf.push(NESTED);
	for v in values {
		if v.is_none() {
			// nested nulls are escaped so they cannot end the frame
			buf.push(NIL);
			buf.push(ESCAPE);
		} else {
			encode_element(&mut buf, v, &mut offset)?;
		}
	}
	buf.push(NIL);
	if offset.is_some() {
		return Err(Error::Encode("incomplete versionstamp in a nested tuple".to_string()));
	}
	Ok(buf)
}

fn encode_element(buf: &mut Vec<u8>, value: &Value, offset: &mut Option<u32>) -> Result<(), Error> {
	match value {
		Value::None => buf.push(NIL),
		Value::Bytes(v) => {
			buf.push(BYTES);
			encode_escaped(buf, v);
		}
		Value::Strand(v) => {
			buf.push(STRING);
			encode_escaped(buf, v.as_bytes());
		}
		Value::Array(Array(vals)) => {
			buf.push(NESTED);
			for v in vals {
				if v.is_none() {
					buf.push(NIL);
					buf.push(ESCAPE);
				} else {
					encode_element(buf, v, offset)?;
				}
			}
			buf.push(NIL);
		}
		Value::Int(v) => encode_int(buf, *v),
		Value::Float32(v) => {
			buf.push(FLOAT32);
			let bits = v.to_bits();
			let bits = if bits >> 31 == 1 {
				!bits
			} else {
				bits ^ 0x8000_0000
			};
			buf.extend_from_slice(&bits.to_be_bytes());
		}
		Value::Float64(v) => {
			buf.push(FLOAT64);
			let bits = v.to_bits();
			let bits = if bits >> 63 == 1 {
				!bits
			} else {
				bits ^ 0x8000_0000_0000_0000
			};
			buf.extend_from_slice(&bits.to_be_bytes());
		}
		Value::Bool(v) => buf.push(if *v {
			TRUE
		} else {
			FALSE
		}),
		Value::Uuid(v) => {
			buf.push(UUID);
			buf.extend_from_slice(v.as_bytes());
		}
		Value::Versionstamp(v) => {
			buf.push(VERSIONSTAMP);
			if v.is_incomplete() {
				if offset.is_some() {
					return Err(Error::Encode(
						"at most one incomplete versionstamp is allowed per key".to_string(),
					));
				}
				*offset = Some(buf.len() as u32);
			}
			buf.extend_from_slice(v.as_bytes());
		}
		Value::Object(_) => {
			return Err(Error::Encode("objects are not tuple-representable".to_string()));
		}
	}
	Ok(())
}

/// Body bytes with every `0x00` escaped as `0x00 0xff`, then terminated
fn encode_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
	for b in bytes {
		buf.push(*b);
		if *b == NIL {
			buf.push(ESCAPE);
		}
	}
	buf.push(NIL);
}

/// Minimal big-endian magnitude with the tag carrying the byte length.
/// Negative magnitudes are stored in one's complement so that byte order
/// matches numeric order.
fn encode_int(buf: &mut Vec<u8>, v: i64) {
	match v {
		0 => buf.push(INT_ZERO),
		v if v > 0 => {
			let be = (v as u64).to_be_bytes();
			let skip = be.iter().take_while(|b| **b == 0).count();
			buf.push(INT_ZERO + (8 - skip) as u8);
			buf.extend_from_slice(&be[skip..]);
		}
		v => {
			let m = v.unsigned_abs();
			let be = m.to_be_bytes();
			let skip = be.iter().take_while(|b| **b == 0).count();
			buf.push(INT_ZERO - (8 - skip) as u8);
			buf.extend(be[skip..].iter().map(|b| !*b));
		}
	}
}

/// Packs a single value; a convenience for key construction
pub fn pack_one(value: &Value) -> Result<Vec<u8>, Error> {
	pack(std::slice::from_ref(value))
}

/// Parses a uuid element body; shared with the decoder
pub(crate) fn uuid_from_slice(bytes: &[u8]) -> Uuid {
	Uuid::from_bytes(bytes.try_into().unwrap())
}

/// Parses a versionstamp element body; shared with the decoder
pub(crate) fn versionstamp_from_slice(bytes: &[u8]) -> Versionstamp {
	Versionstamp::new(bytes.try_into().unwrap())
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::SmallRng;
	use rand::{Rng, SeedableRng};

	fn roundtrip(values: Vec<Value>) {
		let bytes = pack(&values).unwrap();
		let out = unpack(&bytes).unwrap();
		assert_eq!(values, out, "round trip through {:02x?}", bytes);
	}

	#[test]
	fn encode_null() {
		assert_eq!(pack(&[Value::None]).unwrap(), vec![0x00]);
	}

	#[test]
	fn encode_bytes_escapes_zero() {
		let v = Value::from(vec![0x01u8, 0x00, 0x02]);
		assert_eq!(pack_one(&v).unwrap(), vec![0x01, 0x01, 0x00, 0xff, 0x02, 0x00]);
	}

	#[test]
	fn encode_string() {
		let v = Value::from("foo");
		assert_eq!(pack_one(&v).unwrap(), vec![0x02, b'f', b'o', b'o', 0x00]);
	}

	#[test]
	fn encode_ints() {
		assert_eq!(pack_one(&Value::from(0)).unwrap(), vec![0x14]);
		assert_eq!(pack_one(&Value::from(1)).unwrap(), vec![0x15, 0x01]);
		assert_eq!(pack_one(&Value::from(255)).unwrap(), vec![0x15, 0xff]);
		assert_eq!(pack_one(&Value::from(256)).unwrap(), vec![0x16, 0x01, 0x00]);
		assert_eq!(pack_one(&Value::from(-1)).unwrap(), vec![0x13, 0xfe]);
		assert_eq!(pack_one(&Value::from(-256)).unwrap(), vec![0x12, 0xfe, 0xff]);
		assert_eq!(
			pack_one(&Value::from(i64::MAX)).unwrap(),
			vec![0x1c, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
		);
		assert_eq!(
			pack_one(&Value::from(i64::MIN)).unwrap(),
			vec![0x0c, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
		);
	}

	#[test]
	fn encode_floats_flip_sign() {
		assert_eq!(
			pack_one(&Value::Float64(1.0)).unwrap(),
			vec![0x21, 0xbf, 0xf0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
		);
		assert_eq!(
			pack_one(&Value::Float64(-1.0)).unwrap(),
			vec![0x21, 0x40, 0x0f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
		);
		assert_eq!(
			pack_one(&Value::Float32(0.0)).unwrap(),
			vec![0x20, 0x80, 0x00, 0x00, 0x00]
		);
	}

	#[test]
	fn encode_nested_tuple() {
		let v = Value::from(vec![Value::from("a"), Value::None, Value::from(1)]);
		assert_eq!(
			pack_one(&v).unwrap(),
			vec![0x05, 0x02, b'a', 0x00, 0x00, 0xff, 0x15, 0x01, 0x00]
		);
	}

	#[test]
	fn empty_string_and_bytes_are_distinct() {
		let s = pack_one(&Value::from("")).unwrap();
		let b = pack_one(&Value::from(Vec::<u8>::new())).unwrap();
		assert_eq!(s, vec![0x02, 0x00]);
		assert_eq!(b, vec![0x01, 0x00]);
		assert_ne!(s, b);
	}

	#[test]
	fn incomplete_versionstamp_reports_offset() {
		let values =
			vec![Value::from(9), Value::Versionstamp(crate::vs::Versionstamp::incomplete(0))];
		let (bytes, offset) = pack_with_versionstamp(&values).unwrap();
		assert_eq!(offset, Some(3));
		assert_eq!(&bytes[..3], &[0x15, 0x09, 0x33]);
		assert!(pack(&values).is_err());
	}

	fn arbitrary_value(rng: &mut SmallRng, depth: usize) -> Value {
		match rng.gen_range(0..if depth == 0 {
			9
		} else {
			10
		}) {
			0 => Value::None,
			1 => {
				let len = rng.gen_range(0..12);
				Value::from((0..len).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>())
			}
			2 => {
				let len = rng.gen_range(0..12);
				Value::from(
					(0..len).map(|_| rng.gen_range('a'..='z')).collect::<String>(),
				)
			}
			3 => Value::from(rng.gen::<i64>()),
			4 => Value::Float32(f32::from_bits(rng.gen::<u32>())),
			5 => Value::Float64(f64::from_bits(rng.gen::<u64>())),
			6 => Value::Bool(rng.gen()),
			7 => Value::Uuid(uuid::Uuid::from_u128(rng.gen())),
			8 => Value::Versionstamp(crate::vs::Versionstamp::from_parts(
				rng.gen(),
				rng.gen(),
				rng.gen(),
			)),
			_ => {
				let len = rng.gen_range(0..4);
				Value::from(
					(0..len).map(|_| arbitrary_value(rng, depth - 1)).collect::<Vec<Value>>(),
				)
			}
		}
	}

	fn arbitrary_tuple(rng: &mut SmallRng) -> Vec<Value> {
		let len = rng.gen_range(0..5);
		(0..len).map(|_| arbitrary_value(rng, 2)).collect()
	}

	#[test]
	fn roundtrip_property() {
		let mut rng = SmallRng::seed_from_u64(0x70_71e5);
		for _ in 0..2000 {
			roundtrip(arbitrary_tuple(&mut rng));
		}
	}

	#[test]
	fn order_preservation_property() {
		let mut rng = SmallRng::seed_from_u64(0x0bde5);
		for _ in 0..2000 {
			let a = arbitrary_tuple(&mut rng);
			let b = arbitrary_tuple(&mut rng);
			let pa = pack(&a).unwrap();
			let pb = pack(&b).unwrap();
			assert_eq!(
				a.cmp(&b),
				pa.cmp(&pb),
				"value order and byte order disagree for {a:?} / {b:?}"
			);
		}
	}

	#[test]
	fn truncated_input_fails_with_offset() {
		let bytes = pack(&[Value::from(1000)]).unwrap();
		let err = unpack(&bytes[..bytes.len() - 1]).unwrap_err();
		match err {
			Error::Decode {
				offset,
				..
			} => assert_eq!(offset, 1),
			e => panic!("unexpected error {e:?}"),
		}
	}

	#[test]
	fn unknown_tag_fails() {
		assert!(unpack(&[0x7f]).is_err());
	}
}
