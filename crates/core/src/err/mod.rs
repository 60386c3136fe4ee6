use crate::schema::IndexState;
use crate::val::Value;
use semver::Version;
use std::string::FromUtf8Error;
use thiserror::Error;

/// A convenience alias for results produced by this crate
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating from the record layer
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// There was a problem with the underlying datastore
	#[error("There was a problem with the underlying datastore: {0}")]
	Ds(String),

	/// There was a problem with a datastore transaction
	#[error("There was a problem with a datastore transaction: {0}")]
	Tx(String),

	/// The transaction was already committed or cancelled
	#[error("Couldn't update a finished transaction")]
	TxFinished,

	/// The current transaction was created as read-only
	#[error("Couldn't write to a read only transaction")]
	TxReadonly,

	/// The transaction hit a transient conflict and can be retried
	#[error("Failed to commit transaction due to a read or write conflict. This transaction can be retried")]
	TxRetryable,

	/// The transaction exceeded its timeout
	#[error("The transaction exceeded its timeout and can not be committed")]
	TxTimeout,

	/// The transaction buffered more data than the size limit allows
	#[error("The transaction exceeded its size limit and can not be committed")]
	TxTooLarge,

	/// The conditional value check of a `putc`/`delc` did not match
	#[error("Value being checked was not correct")]
	TxConditionNotMet,

	/// The key being inserted with `put` already exists
	#[error("The key being inserted already exists")]
	TxKeyAlreadyExists,

	/// A key or tuple could not be decoded
	#[error("Failed to decode tuple at offset {offset}: {reason}")]
	Decode {
		offset: usize,
		reason: String,
	},

	/// A value could not be represented as a tuple element
	#[error("Failed to encode tuple: {0}")]
	Encode(String),

	/// A record payload or metadata value could not be (de)serialized
	#[error("Serialization error: {0}")]
	Serialization(String),

	/// The requested record type is not declared in the schema
	#[error("Record type '{0}' does not exist in the schema")]
	UnknownRecordType(String),

	/// The requested field path is not declared for the record type
	#[error("Field '{path}' does not exist on record type '{record_type}'")]
	UnknownField {
		record_type: String,
		path: String,
	},

	/// The requested index is not declared in the schema
	#[error("Index '{0}' does not exist in the schema")]
	UnknownIndex(String),

	/// A record is missing one of its primary key fields
	#[error("Record of type '{record_type}' is missing primary key field '{path}'")]
	MissingPrimaryKey {
		record_type: String,
		path: String,
	},

	/// The schema definition is invalid
	#[error("Invalid schema: {0}")]
	InvalidSchema(String),

	/// A configuration option is out of range
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	/// A unique index already contains the indexed values under another key
	#[error("Database index `{index}` already contains {value}, with record `{existing}`, when inserting record `{new}`")]
	UniquenessViolation {
		index: String,
		value: Value,
		existing: Value,
		new: Value,
	},

	/// The index cannot serve reads in its current state
	#[error("Index '{index}' is not readable (state is {state}). Build the index online before querying it")]
	IndexNotReadable {
		index: String,
		state: IndexState,
	},

	/// The vector index exists but its graph has not been built
	#[error("The HNSW graph for index '{index}' is missing or corrupt")]
	GraphMissing {
		index: String,
	},

	/// A version-guarded save observed a different latest versionstamp
	#[error("Version mismatch on record type '{record_type}': the record was modified concurrently")]
	VersionMismatch {
		record_type: String,
	},

	/// The migration lease is held by another process
	#[error("A migration is already in progress (lease held by {owner})")]
	MigrationLockHeld {
		owner: String,
	},

	/// No chain of registered migrations connects the two versions
	#[error("No migration path from version {from} to version {to}")]
	MigrationPathMissing {
		from: Version,
		to: Version,
	},

	/// The schema delta is not additive and needs a scripted migration
	#[error("Schema change requires a custom migration: {0}")]
	MigrationManual(String),

	/// An online build is already registered for this index
	#[error("An online operation is already running for index '{0}'")]
	BuildAlreadyRunning(String),

	/// The operation was cancelled through its cancellation flag
	#[error("The operation was cancelled")]
	Cancelled,

	/// Represents an underlying IO error
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Whether the transaction wrapper may transparently retry after this error
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::TxRetryable)
	}
}

impl From<Box<bincode::ErrorKind>> for Error {
	fn from(e: Box<bincode::ErrorKind>) -> Error {
		Error::Serialization(e.to_string())
	}
}

impl From<FromUtf8Error> for Error {
	fn from(e: FromUtf8Error) -> Error {
		Error::Serialization(e.to_string())
	}
}
