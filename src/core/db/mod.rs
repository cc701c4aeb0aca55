/// Database Module
///
/// The connection handle and everything between it and the driver.
///
/// ## Architecture
///
/// - **Connection Management** (`connection.rs`): the `Db` handle, its configuration and transaction entry points
/// - **Transactions** (`transaction.rs`): nested transaction state machine and execution target selection
/// - **Query Execution** (`query.rs`, `statement.rs`): exec/query/row/value operations and prepared statements
/// - **Results** (`reader.rs`, `table.rs`): streaming reader and materialized tables
///
/// ## Error Handling
///
/// All operations return `DbxError`; driver errors pass through unchanged.
pub mod connection;
pub mod query;
pub mod reader;
pub mod statement;
pub mod table;
pub mod transaction;

pub use connection::*;
pub use reader::*;
pub use statement::*;
pub use table::*;
pub use transaction::*;
