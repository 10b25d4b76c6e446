pub mod accessor;
pub mod delta;
pub mod edge;
pub mod gc;
pub mod indices;
pub mod mvcc;
pub mod schema;
pub mod shard;
pub mod splitter;
pub mod transaction;
pub mod vertex;

pub use accessor::{Accessor, EdgeAccessor, VertexAccessor, VertexIterator};
pub use edge::{EdgeKey, EdgeLink};
pub use gc::GcStats;
pub use indices::IndicesInfo;
pub use mvcc::{CommitLog, Snapshot, TxState};
pub use schema::{SchemaProperty, SchemaType, SchemasInfo};
pub use shard::{Shard, SplitSuggestion, StorageInfo};
pub use splitter::SplitData;
pub use transaction::Transaction;
pub use vertex::VertexId;
