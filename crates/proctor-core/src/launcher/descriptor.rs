//! The settings bag an agency hands to a launcher.

use std::collections::BTreeMap;

/// Well-known setting names.
pub mod keys {
    pub const TARGET_RUNTIME_FRAMEWORK: &str = "TargetRuntimeFramework";
    pub const RUN_AS_X86: &str = "RunAsX86";
    pub const DEBUG_AGENT: &str = "DebugAgent";
    pub const DEBUG_TESTS: &str = "DebugTests";
    pub const INTERNAL_TRACE_LEVEL: &str = "InternalTraceLevel";
    pub const LOAD_USER_PROFILE: &str = "LoadUserProfile";
    pub const WORK_DIRECTORY: &str = "WorkDirectory";
}

/// A single setting value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Str(String),
    Bool(bool),
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Describes what to run and how. Launchers only read it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    settings: BTreeMap<String, SettingValue>,
}

impl WorkloadDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.settings.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key)
    }

    /// String setting, or `default` when absent or not a string.
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.settings.get(key) {
            Some(SettingValue::Str(s)) => s,
            _ => default,
        }
    }

    /// Boolean setting, or `default` when absent or not a boolean.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.settings.get(key) {
            Some(SettingValue::Bool(b)) => *b,
            _ => default,
        }
    }

    pub fn target_runtime(&self) -> &str {
        self.get_str(keys::TARGET_RUNTIME_FRAMEWORK, "")
    }

    pub fn run_as_x86(&self) -> bool {
        self.get_bool(keys::RUN_AS_X86, false)
    }

    pub fn debug_agent(&self) -> bool {
        self.get_bool(keys::DEBUG_AGENT, false)
    }

    pub fn debug_tests(&self) -> bool {
        self.get_bool(keys::DEBUG_TESTS, false)
    }

    /// Trace level name; `"Off"` when unset.
    pub fn trace_level(&self) -> &str {
        self.get_str(keys::INTERNAL_TRACE_LEVEL, "Off")
    }

    pub fn load_user_profile(&self) -> bool {
        self.get_bool(keys::LOAD_USER_PROFILE, false)
    }

    pub fn work_directory(&self) -> &str {
        self.get_str(keys::WORK_DIRECTORY, "")
    }
}
