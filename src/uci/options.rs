use crate::config::EngineConfig;

use super::command::EngineCommand;

pub const SKILL_LEVEL: &str = "Skill Level";
pub const CONTEMPT: &str = "Contempt";
pub const MOVE_OVERHEAD: &str = "Move Overhead";
pub const MULTI_PV: &str = "MultiPV";

/// Options set by `apply_config`, in the order they are sent
pub const CONFIG_OPTION_ORDER: [&str; 3] = [SKILL_LEVEL, CONTEMPT, MOVE_OVERHEAD];

/// Options the engine advertised during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisedOptions {
    names: Vec<String>,
}

impl AdvertisedOptions {
    pub fn record(&mut self, name: &str) {
        self.names.push(name.trim().to_ascii_lowercase());
    }

    /// Unknown engines (nothing advertised) are assumed to support everything.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// `setoption` commands for a config, in [`CONFIG_OPTION_ORDER`].
///
/// Options the engine did not advertise are skipped.
#[must_use]
pub fn config_commands(config: &EngineConfig, advertised: &AdvertisedOptions) -> Vec<EngineCommand> {
    CONFIG_OPTION_ORDER
        .iter()
        .filter(|name| advertised.supports(name))
        .map(|name| match *name {
            SKILL_LEVEL => EngineCommand::set_option(name, config.search_skill_level),
            CONTEMPT => EngineCommand::set_option(name, config.contempt),
            _ => EngineCommand::set_option(name, config.move_overhead_ms),
        })
        .collect()
}
