use crate::err::Error;
use crate::schema::Distance;
use crate::val::Value;
use serde::{Deserialize, Serialize};

/// An embedding vector, stored at the precision the field provided.
///
/// Half-precision storage is not supported; narrower inputs widen to f32.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub enum Vector {
	F32(Vec<f32>),
	F64(Vec<f64>),
}

impl Vector {
	/// Builds a vector from an array value, checking the dimension count
	pub fn try_from_value(value: &Value, dimensions: usize) -> Result<Self, Error> {
		let arr = match value {
			Value::Array(a) => a,
			v => {
				return Err(Error::Serialization(format!(
					"expected an embedding array, got {}",
					v.kind()
				)))
			}
		};
		if arr.0.len() != dimensions {
			return Err(Error::Serialization(format!(
				"embedding has {} dimensions, the index expects {dimensions}",
				arr.0.len()
			)));
		}
		// Widen to f64 when any component is f64, otherwise stay f32
		if arr.0.iter().any(|v| matches!(v, Value::Float64(_))) {
			let mut out = Vec::with_capacity(arr.0.len());
			for v in &arr.0 {
				out.push(v.as_f64().ok_or_else(|| {
					Error::Serialization(format!("non-numeric embedding component {}", v.kind()))
				})?);
			}
			Ok(Vector::F64(out))
		} else {
			let mut out = Vec::with_capacity(arr.0.len());
			for v in &arr.0 {
				let f = match v {
					Value::Float32(f) => *f,
					Value::Int(i) => *i as f32,
					v => {
						return Err(Error::Serialization(format!(
							"non-numeric embedding component {}",
							v.kind()
						)))
					}
				};
				out.push(f);
			}
			Ok(Vector::F32(out))
		}
	}

	pub fn len(&self) -> usize {
		match self {
			Vector::F32(v) => v.len(),
			Vector::F64(v) => v.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn widened(&self) -> Vec<f64> {
		match self {
			Vector::F32(v) => v.iter().map(|f| *f as f64).collect(),
			Vector::F64(v) => v.clone(),
		}
	}

	fn check_same_dimension(fnc: &str, a: &Self, b: &Self) -> Result<(), Error> {
		if a.len() != b.len() {
			return Err(Error::Serialization(format!(
				"{fnc}: vectors have {} and {} dimensions",
				a.len(),
				b.len()
			)));
		}
		Ok(())
	}

	fn dot(a: &[f64], b: &[f64]) -> f64 {
		a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
	}

	fn magnitude(v: &[f64]) -> f64 {
		Self::dot(v, v).sqrt()
	}

	fn cosine_distance(&self, other: &Self) -> f64 {
		let a = self.widened();
		let b = other.widened();
		let d = Self::magnitude(&a) * Self::magnitude(&b);
		if d == 0.0 {
			return 1.0;
		}
		1.0 - Self::dot(&a, &b) / d
	}

	fn euclidean_distance(&self, other: &Self) -> f64 {
		let a = self.widened();
		let b = other.widened();
		a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
	}

	fn inner_product_distance(&self, other: &Self) -> f64 {
		let a = self.widened();
		let b = other.widened();
		-Self::dot(&a, &b)
	}

	/// The distance between two vectors under the index metric.
	/// Smaller is closer for every metric.
	pub fn distance(&self, other: &Self, metric: Distance) -> Result<f64, Error> {
		Self::check_same_dimension("distance", self, other)?;
		Ok(match metric {
			Distance::Cosine => self.cosine_distance(other),
			Distance::Euclidean => self.euclidean_distance(other),
			Distance::InnerProduct => self.inner_product_distance(other),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn v(components: &[f32]) -> Vector {
		Vector::F32(components.to_vec())
	}

	#[test]
	fn euclidean() {
		let d = v(&[0.0, 0.0]).distance(&v(&[3.0, 4.0]), Distance::Euclidean).unwrap();
		assert!((d - 5.0).abs() < 1e-9);
	}

	#[test]
	fn cosine() {
		let d = v(&[1.0, 0.0]).distance(&v(&[0.0, 1.0]), Distance::Cosine).unwrap();
		assert!((d - 1.0).abs() < 1e-9);
		let same = v(&[2.0, 0.0]).distance(&v(&[4.0, 0.0]), Distance::Cosine).unwrap();
		assert!(same.abs() < 1e-9);
	}

	#[test]
	fn inner_product_orders_by_similarity() {
		let q = v(&[1.0, 1.0]);
		let near = q.distance(&v(&[2.0, 2.0]), Distance::InnerProduct).unwrap();
		let far = q.distance(&v(&[0.1, 0.1]), Distance::InnerProduct).unwrap();
		assert!(near < far);
	}

	#[test]
	fn dimension_mismatch_fails() {
		assert!(v(&[1.0]).distance(&v(&[1.0, 2.0]), Distance::Euclidean).is_err());
	}

	#[test]
	fn from_value_checks_dimensions() {
		let ok = Value::from(vec![1.0f32, 2.0]);
		assert!(Vector::try_from_value(&ok, 2).is_ok());
		assert!(Vector::try_from_value(&ok, 3).is_err());
		assert!(Vector::try_from_value(&Value::from("nope"), 2).is_err());
	}
}
