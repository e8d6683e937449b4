pub mod append_log;
pub mod audit;
pub mod config;
pub mod filter;
pub mod fsname;
pub mod history;
pub mod lock;
pub mod media_requester;
pub mod message_reader;
pub mod paths;
pub mod record;
pub mod record_index;
pub mod run;
pub mod side_entity;
pub mod stories;
pub mod store;
pub mod util;
