//! Leads: saved businesses and the lists they are organized into.

pub mod model;

pub use model::{
    EmailTemplate, Lead, LeadList, LeadListUpdate, LeadTag, ListEntry, ListItem, ListItemUpdate,
    UserSettings,
};
