//! b24sync Client - HTTP client for the Bitrix24 REST webhook API.

pub mod bitrix;

pub use bitrix::BitrixClient;
