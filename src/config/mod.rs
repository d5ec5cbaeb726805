pub mod schema;

pub use schema::{
    ActionsConfig, BotConfig, Config, HipChatConfig, ReliabilityConfig, SlackConfig, StateConfig,
    ThrottleConfig,
};
