//! Plan execution: ties a plan tree, a transaction, and the store's
//! resolved configuration together into a streaming run.

use super::iterators::{Cursor, Token};
use super::plan::PlanNode;
use crate::cnf::Config;
use crate::err::Error;
use crate::idx::monitor::IndexMonitor;
use crate::key;
use crate::key::Subspace;
use crate::kvs::Transaction;
use crate::schema::Schema;
use crate::store::codec::RecordCodec;
use crate::val::{Object, Value};

/// Everything a cursor needs to pull rows
pub(crate) struct Executor<'a> {
	pub tx: &'a mut Transaction,
	pub schema: &'a Schema,
	pub root: &'a Subspace,
	pub cfg: &'a Config,
	pub codec: &'a dyn RecordCodec,
	pub monitor: &'a IndexMonitor,
}

impl Executor<'_> {
	/// Loads and decodes one record by type and primary key
	pub(crate) async fn load_record(
		&mut self,
		record_type: &str,
		pk: &[Value],
	) -> Result<Option<Object>, Error> {
		let key = key::record::new(self.root, record_type, pk)?;
		match self.tx.get(key).await? {
			Some(bytes) => Ok(Some(self.codec.deserialize(&bytes)?)),
			None => Ok(None),
		}
	}
}

/// The outcome of one plan execution
#[derive(Debug, Default)]
pub struct QueryOutput {
	pub records: Vec<Object>,
	/// Resume token when the stream stopped before exhaustion
	pub continuation: Option<Vec<u8>>,
}

/// Runs a plan to completion (or to `page_size` rows) inside the
/// executor's transaction
pub(crate) async fn execute(
	exe: &mut Executor<'_>,
	plan: &PlanNode,
	continuation: Option<&[u8]>,
	page_size: Option<usize>,
) -> Result<QueryOutput, Error> {
	let token = continuation.map(Token::decode).transpose()?;
	let mut cursor = Cursor::build(exe.schema, exe.root, plan, token)?;
	let mut records = Vec::new();
	loop {
		if let Some(page) = page_size {
			if records.len() >= page {
				break;
			}
		}
		match cursor.next(exe).await? {
			Some((_, record)) => records.push(record),
			None => break,
		}
	}
	let continuation = cursor.token().map(|t| t.encode()).transpose()?;
	Ok(QueryOutput {
		records,
		continuation,
	})
}
