//! Campaigns: bulk outreach over a saved lead list.

pub mod model;
pub mod runner;
pub mod template;

pub use model::{
    CallOutcome, Campaign, CampaignCounters, CampaignStatus, CampaignType, DeliveryStatus,
    NewCampaign, Recipient, RunSummary,
};
pub use runner::{CampaignRunner, NO_EMAIL_FOUND, PreparedRun};
