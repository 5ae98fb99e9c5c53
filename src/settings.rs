//! Formatting, compatibility and transport settings.
//!
//! Every settings type derives `Deserialize` with field defaults, so a
//! partial document in any serde format yields a complete configuration.

use crate::datetime::DEFAULT_FORMAT;
use crate::policy::MappingPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options controlling the textual shape of emitted documents. The decoder
/// accepts the output of every combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    /// Spaces per nesting level when `use_indentation` is set.
    pub indentation: usize,
    pub use_indentation: bool,
    /// Write `<x />` for empty elements instead of `<x></x>`.
    pub use_empty_element_tags: bool,
    /// Write an empty `params` element for zero-argument calls.
    pub use_empty_params_tag: bool,
    /// Write `<int>` instead of `<i4>`.
    pub use_int_tag: bool,
    /// Wrap strings in `<string>`; otherwise write them as implicit strings.
    pub use_string_tag: bool,
    pub omit_xml_declaration: bool,
    /// chrono format string for `dateTime.iso8601` values.
    pub date_time_format: String,
}

impl Default for FormatSettings {
    fn default() -> Self {
        FormatSettings {
            indentation: 2,
            use_indentation: true,
            use_empty_element_tags: true,
            use_empty_params_tag: true,
            use_int_tag: false,
            use_string_tag: true,
            omit_xml_declaration: false,
            date_time_format: DEFAULT_FORMAT.to_string(),
        }
    }
}

impl FormatSettings {
    /// Single-line output without indentation.
    pub fn compact() -> Self {
        FormatSettings {
            use_indentation: false,
            ..Self::default()
        }
    }

    pub(crate) fn int_tag(&self) -> &'static str {
        if self.use_int_tag { "int" } else { "i4" }
    }
}

/// Compatibility switches for peers that deviate from the XML-RPC grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonStandard {
    /// Emit and accept the `<nil/>` extension.
    pub allow_nil: bool,
    /// Keep the first of several struct members with the same name.
    pub ignore_duplicate_members: bool,
    /// Accept `yyyy-MM-ddTHH:mm:ss`, a trailing `Z`, compact time and
    /// fractional seconds in `dateTime.iso8601` values.
    pub allow_non_standard_date_time: bool,
    /// Map the all-zero dateTime sentinel to the minimum date.
    pub map_zeros_date_time_to_min_value: bool,
    /// Map an empty dateTime element to the minimum date.
    pub map_empty_date_time_to_min_value: bool,
    /// Strip leading whitespace that precedes the XML of a response.
    pub allow_invalid_http_content: bool,
}

impl Default for NonStandard {
    fn default() -> Self {
        NonStandard {
            allow_nil: true,
            ignore_duplicate_members: false,
            allow_non_standard_date_time: false,
            map_zeros_date_time_to_min_value: false,
            map_empty_date_time_to_min_value: false,
            allow_invalid_http_content: false,
        }
    }
}

impl NonStandard {
    /// Every compatibility switch turned on.
    pub fn all() -> Self {
        NonStandard {
            allow_nil: true,
            ignore_duplicate_members: true,
            allow_non_standard_date_time: true,
            map_zeros_date_time_to_min_value: true,
            map_empty_date_time_to_min_value: true,
            allow_invalid_http_content: true,
        }
    }
}

/// Settings consumed by HTTP transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub user_agent: String,
    /// Request timeout in milliseconds; `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
    /// Extra request headers, sent in order.
    pub headers: Vec<(String, String)>,
    pub keep_alive: bool,
}

impl Default for WebSettings {
    fn default() -> Self {
        WebSettings {
            user_agent: concat!("xmlrpc-serde/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_ms: Some(100_000),
            headers: Vec::new(),
            keep_alive: true,
        }
    }
}

impl WebSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Everything a codec or client call needs besides the values themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub format: FormatSettings,
    pub non_standard: NonStandard,
    pub web: WebSettings,
    /// Mapping policy used at the top of every encode and decode.
    pub policy: MappingPolicy,
}

impl Config {
    pub fn with_format(mut self, format: FormatSettings) -> Self {
        self.format = format;
        self
    }

    pub fn with_non_standard(mut self, non_standard: NonStandard) -> Self {
        self.non_standard = non_standard;
        self
    }

    pub fn with_policy(mut self, policy: MappingPolicy) -> Self {
        self.policy = policy;
        self
    }
}
