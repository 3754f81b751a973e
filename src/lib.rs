//! Leadgen: lead sourcing and bulk outreach.

pub mod api;
pub mod campaigns;
pub mod config;
pub mod contacts;
pub mod dispatch;
pub mod error;
pub mod leads;
pub mod mail;
pub mod oauth;
pub mod places;
pub mod store;
