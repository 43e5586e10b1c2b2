mod topic_hub;
mod ws_handler;

pub use topic_hub::{HubStats, TopicHub};
pub use ws_handler::ws_handler;
