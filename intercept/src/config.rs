//! Interceptor configuration and its environment overrides.

use log::warn;

use crate::arch::Architecture;
use crate::descriptor::patcher::PatchStyle;
use crate::error::{HookError, Result};

/// Target architecture (`arm`, `arm64`, `x86`, `x86_64`, `mips`). Defaults to the host.
pub const ENV_ARCH: &str = "REHOOK_ARCH";
/// `compiled-entry` or `native-bridge`.
pub const ENV_PATCH_STYLE: &str = "REHOOK_PATCH_STYLE";
/// Extra zeroed bytes appended to every descriptor snapshot.
pub const ENV_SNAPSHOT_SLACK: &str = "REHOOK_SNAPSHOT_SLACK";
/// When set to `1`/`true`, zero-parameter hooked calls get an empty array instead of null.
pub const ENV_EMPTY_ARGS: &str = "REHOOK_EMPTY_ARGS";

/// Default slack appended to descriptor snapshots, for vendor runtimes whose descriptors carry
/// fields beyond the reported size.
pub const DEFAULT_SNAPSHOT_SLACK: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptConfig {
    /// `None` selects the host architecture.
    pub architecture: Option<Architecture>,
    pub patch_style: PatchStyle,
    pub snapshot_slack: usize,
    /// Pass `[]` rather than null as the argument array of zero-parameter methods, as older
    /// runtimes did.
    pub empty_args_array: bool,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        InterceptConfig {
            architecture: None,
            patch_style: PatchStyle::default(),
            snapshot_slack: DEFAULT_SNAPSHOT_SLACK,
            empty_args_array: false,
        }
    }
}

impl InterceptConfig {
    /// Defaults overridden by the `REHOOK_*` environment variables. Malformed values are
    /// logged and ignored.
    pub fn from_env() -> InterceptConfig {
        InterceptConfig::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> InterceptConfig {
        if let Some(v) = var(ENV_ARCH) {
            match v.parse::<Architecture>() {
                Ok(arch) => self.architecture = Some(arch),
                Err(e) => warn!("ignoring {ENV_ARCH}: {e}"),
            }
        }
        if let Some(v) = var(ENV_PATCH_STYLE) {
            match PatchStyle::parse(&v) {
                Some(style) => self.patch_style = style,
                None => warn!("ignoring {ENV_PATCH_STYLE}: unknown style `{v}`"),
            }
        }
        if let Some(v) = var(ENV_SNAPSHOT_SLACK) {
            match v.trim().parse::<usize>() {
                Ok(n) => self.snapshot_slack = n,
                Err(e) => warn!("ignoring {ENV_SNAPSHOT_SLACK}: {e}"),
            }
        }
        if let Some(v) = var(ENV_EMPTY_ARGS) {
            self.empty_args_array = matches!(v.trim(), "1" | "true" | "yes");
        }
        self
    }

    pub fn with_architecture(mut self, arch: Architecture) -> Self {
        self.architecture = Some(arch);
        self
    }

    pub fn with_patch_style(mut self, style: PatchStyle) -> Self {
        self.patch_style = style;
        self
    }

    pub fn with_snapshot_slack(mut self, slack: usize) -> Self {
        self.snapshot_slack = slack;
        self
    }

    pub fn with_empty_args_array(mut self, enabled: bool) -> Self {
        self.empty_args_array = enabled;
        self
    }

    /// The configured architecture, or the host's.
    pub fn resolve_architecture(&self) -> Result<Architecture> {
        self.architecture
            .or_else(Architecture::host)
            .ok_or_else(|| HookError::UnsupportedArchitecture(std::env::consts::ARCH.to_string()))
    }
}
