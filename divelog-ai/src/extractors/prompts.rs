//! Prompt variants for the vision backend
//!
//! One parameterized pipeline serves every image source; what differs per
//! source is only the instruction text, selected by profile name.

use divelog_common::config::PromptSection;
use std::collections::BTreeMap;

/// Profile used when nothing else is configured
pub const DEFAULT_PROFILE: &str = "dive_computer";

const DIVE_COMPUTER_PROMPT: &str = "Transcribe every reading visible on this dive computer \
or freediving watch screen exactly as displayed, one reading per line. Keep labels (Max Depth, \
Dive Time, Temp, Date) and units (m, ft, °C, °F) next to their values. Copy times as shown \
(for example 2:53 or 1:02:05). Do not estimate or invent values that are not visible; \
if nothing is readable, return an empty response.";

const LOGBOOK_PROMPT: &str = "Transcribe this freediving logbook entry exactly as written, \
one field per line, keeping labels and units such as depth in m or ft, dive time as M:SS, \
water temperature in °C or °F and the dive date. Do not guess illegible values.";

const APP_SCREENSHOT_PROMPT: &str = "Transcribe the dive summary shown in this app \
screenshot exactly as displayed, one value per line with its label and unit (max depth, \
dive time, water temperature, date). Do not add values that are not on screen.";

/// Named instruction texts plus the default profile
#[derive(Debug, Clone, PartialEq)]
pub struct PromptProfiles {
    default_profile: String,
    profiles: BTreeMap<String, String>,
}

impl PromptProfiles {
    /// Built-in profiles only
    pub fn builtin() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), DIVE_COMPUTER_PROMPT.to_string());
        profiles.insert("logbook".to_string(), LOGBOOK_PROMPT.to_string());
        profiles.insert("app_screenshot".to_string(), APP_SCREENSHOT_PROMPT.to_string());
        Self {
            default_profile: DEFAULT_PROFILE.to_string(),
            profiles,
        }
    }

    /// Built-in profiles overlaid with the `[prompts]` config section
    ///
    /// An unknown `default_profile` is ignored in favour of the built-in default.
    pub fn from_section(section: &PromptSection) -> Self {
        let mut prompts = Self::builtin();
        for (name, text) in &section.profiles {
            if !text.trim().is_empty() {
                prompts.profiles.insert(name.clone(), text.clone());
            }
        }
        if let Some(default) = &section.default_profile {
            if prompts.profiles.contains_key(default) {
                prompts.default_profile = default.clone();
            } else {
                tracing::warn!(
                    profile = %default,
                    "Configured default prompt profile does not exist, using {}",
                    DEFAULT_PROFILE
                );
            }
        }
        prompts
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    fn default_instruction(&self) -> &str {
        self.profiles
            .get(&self.default_profile)
            .map(String::as_str)
            .unwrap_or(DIVE_COMPUTER_PROMPT)
    }

    /// Resolve a caller's prompt hint into the instruction sent to the engine
    ///
    /// - no hint: default profile text
    /// - hint naming a profile: that profile's text
    /// - any other hint: default text followed by the hint as extra guidance
    pub fn instruction_for(&self, hint: Option<&str>) -> String {
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());
        match hint {
            None => self.default_instruction().to_string(),
            Some(name) if self.profiles.contains_key(name) => self.profiles[name].clone(),
            Some(extra) => format!(
                "{}\n\nAdditional guidance from the diver: {}",
                self.default_instruction(),
                extra
            ),
        }
    }
}

impl Default for PromptProfiles {
    fn default() -> Self {
        Self::builtin()
    }
}
