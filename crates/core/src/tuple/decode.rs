use super::{
	BYTES, ESCAPE, FALSE, FLOAT32, FLOAT64, INT_ZERO, NESTED, NIL, STRING, TRUE, UUID,
	VERSIONSTAMP,
};
use crate::err::Error;
use crate::val::{Array, Value};

/// Streams the elements of a packed tuple back out.
///
/// Fails with [`Error::Decode`] on unknown tags, truncated bodies, or
/// invalid UTF-8, reporting the byte offset of the offending element.
pub fn unpack(bytes: &[u8]) -> Result<Vec<Value>, Error> {
	let mut out = Vec::new();
	let mut pos = 0;
	while pos < bytes.len() {
		out.push(decode_element(bytes, &mut pos)?);
	}
	Ok(out)
}

fn fail<T>(offset: usize, reason: impl Into<String>) -> Result<T, Error> {
	Err(Error::Decode {
		offset,
		reason: reason.into(),
	})
}

/// Decodes one element starting at `*pos`, advancing the position past it
pub(crate) fn decode_element(bytes: &[u8], pos: &mut usize) -> Result<Value, Error> {
	let start = *pos;
	let tag = bytes[start];
	*pos += 1;
	match tag {
		NIL => Ok(Value::None),
		BYTES => Ok(Value::Bytes(decode_escaped(bytes, pos, start)?)),
		STRING => {
			let raw = decode_escaped(bytes, pos, start)?;
			match String::from_utf8(raw) {
				Ok(s) => Ok(Value::Strand(s)),
				Err(_) => fail(start, "invalid UTF-8 in string element"),
			}
		}
		NESTED => {
			let mut vals = Vec::new();
			loop {
				match bytes.get(*pos) {
					None => return fail(start, "unterminated nested tuple"),
					Some(&NIL) => {
						// 0x00 0xff is an escaped null element, 0x00 ends the tuple
						if bytes.get(*pos + 1) == Some(&ESCAPE) {
							vals.push(Value::None);
							*pos += 2;
						} else {
							*pos += 1;
							break;
						}
					}
					Some(_) => vals.push(decode_element(bytes, pos)?),
				}
			}
			Ok(Value::Array(Array(vals)))
		}
		t if (0x0c..=0x1c).contains(&t) => decode_int(bytes, pos, start, t),
		FLOAT32 => {
			let body = take(bytes, pos, 4, start, "float32")?;
			let bits = u32::from_be_bytes(body.try_into().unwrap());
			let bits = if bits >> 31 == 1 {
				bits ^ 0x8000_0000
			} else {
				!bits
			};
			Ok(Value::Float32(f32::from_bits(bits)))
		}
		FLOAT64 => {
			let body = take(bytes, pos, 8, start, "float64")?;
			let bits = u64::from_be_bytes(body.try_into().unwrap());
			let bits = if bits >> 63 == 1 {
				bits ^ 0x8000_0000_0000_0000
			} else {
				!bits
			};
			Ok(Value::Float64(f64::from_bits(bits)))
		}
		FALSE => Ok(Value::Bool(false)),
		TRUE => Ok(Value::Bool(true)),
		UUID => {
			let body = take(bytes, pos, 16, start, "uuid")?;
			Ok(Value::Uuid(super::uuid_from_slice(body)))
		}
		VERSIONSTAMP => {
			let body = take(bytes, pos, 12, start, "versionstamp")?;
			Ok(Value::Versionstamp(super::versionstamp_from_slice(body)))
		}
		t => fail(start, format!("unknown type tag 0x{t:02x}")),
	}
}

fn take<'a>(
	bytes: &'a [u8],
	pos: &mut usize,
	len: usize,
	start: usize,
	what: &str,
) -> Result<&'a [u8], Error> {
	if *pos + len > bytes.len() {
		return fail(start, format!("truncated {what} body"));
	}
	let body = &bytes[*pos..*pos + len];
	*pos += len;
	Ok(body)
}

/// Reads an escaped body up to its unescaped `0x00` terminator
fn decode_escaped(bytes: &[u8], pos: &mut usize, start: usize) -> Result<Vec<u8>, Error> {
	let mut out = Vec::new();
	loop {
		match bytes.get(*pos) {
			None => return fail(start, "unterminated byte body"),
			Some(&NIL) => {
				if bytes.get(*pos + 1) == Some(&ESCAPE) {
					out.push(NIL);
					*pos += 2;
				} else {
					*pos += 1;
					return Ok(out);
				}
			}
			Some(b) => {
				out.push(*b);
				*pos += 1;
			}
		}
	}
}

fn decode_int(bytes: &[u8], pos: &mut usize, start: usize, tag: u8) -> Result<Value, Error> {
	if tag == INT_ZERO {
		return Ok(Value::Int(0));
	}
	if tag > INT_ZERO {
		let len = (tag - INT_ZERO) as usize;
		let body = take(bytes, pos, len, start, "integer")?;
		let mut be = [0u8; 8];
		be[8 - len..].copy_from_slice(body);
		let m = u64::from_be_bytes(be);
		if m > i64::MAX as u64 {
			return fail(start, "positive integer out of range");
		}
		Ok(Value::Int(m as i64))
	} else {
		let len = (INT_ZERO - tag) as usize;
		let body = take(bytes, pos, len, start, "integer")?;
		let mut be = [0u8; 8];
		for (i, b) in body.iter().enumerate() {
			be[8 - len + i] = !*b;
		}
		let m = u64::from_be_bytes(be) as u128;
		if m > i64::MIN.unsigned_abs() as u128 {
			return fail(start, "negative integer out of range");
		}
		Ok(Value::Int((m as i128).wrapping_neg() as i64))
	}
}
