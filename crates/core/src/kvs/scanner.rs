use super::{Key, Transaction, Val};
use crate::err::Error;
use std::collections::VecDeque;
use std::ops::Range;

/// A pull-based batched range scan.
///
/// Fetches `batch` pairs at a time from the transaction and hands them out
/// one by one, resuming after the last key of each batch. The scanner does
/// not hold the transaction; callers pass it to each `next` call, which
/// keeps scans composable with other work inside the same transaction.
pub(crate) struct Scanner {
	/// The number of keys to fetch at once
	batch: u32,
	/// The remaining key range for this scan
	range: Range<Key>,
	/// The results from the last fetched batch
	results: VecDeque<(Key, Val)>,
	/// Whether this scan should try to fetch more
	exhausted: bool,
}

impl Scanner {
	pub fn new(batch: u32, range: Range<Key>) -> Self {
		Scanner {
			batch,
			range,
			results: VecDeque::new(),
			exhausted: false,
		}
	}

	/// The key the scan would continue from, for continuation tokens
	pub fn resume_from(&self) -> &Key {
		&self.range.start
	}

	/// Skip ahead so the next fetched batch starts after `key`
	pub fn skip_past(&mut self, key: &[u8]) {
		let mut next = key.to_vec();
		next.push(0x00);
		if next > self.range.start {
			self.range.start = next;
		}
	}

	pub async fn next(&mut self, tx: &mut Transaction) -> Result<Option<(Key, Val)>, Error> {
		// If we have results, return the first one
		if let Some(v) = self.results.pop_front() {
			return Ok(Some(v));
		}
		// If we won't fetch more results then exit
		if self.exhausted {
			return Ok(None);
		}
		// Fetch the next batch
		let batch = tx.scan(self.range.clone(), self.batch).await?;
		if batch.len() < self.batch as usize {
			self.exhausted = true;
		}
		match batch.last() {
			Some((k, _)) => {
				self.range.start = k.clone();
				self.range.start.push(0x00);
			}
			None => return Ok(None),
		}
		self.results = batch.into();
		Ok(self.results.pop_front())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};

	#[tokio::test]
	async fn scans_across_batches() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		for i in 0..25u8 {
			tx.set(vec![b'k', i], vec![i]).await.unwrap();
		}
		tx.commit().await.unwrap();

		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		let mut scanner = Scanner::new(10, vec![b'k']..vec![b'l']);
		let mut seen = Vec::new();
		while let Some((k, _)) = scanner.next(&mut tx).await.unwrap() {
			seen.push(k);
		}
		assert_eq!(seen.len(), 25);
		assert!(seen.windows(2).all(|w| w[0] < w[1]));
		tx.cancel().await.unwrap();
	}
}
