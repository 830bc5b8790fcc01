pub mod db;
pub mod ledger;
pub mod queue;
pub mod storage;
