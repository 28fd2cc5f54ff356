//! b24sync CLI - ties the Bitrix client and the Postgres repository into
//! the one-shot sync binary.

pub mod config;

pub use config::Config;
