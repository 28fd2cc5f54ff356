//! b24sync DB - PostgreSQL repository for the CRM mirror tables.

pub mod repository;

pub use repository::CrmRepository;
