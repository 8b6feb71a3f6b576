//! Subscriber wiring for kernel diagnostics.
//!
//! Every emit in this crate goes out under the `keystone_di` target with
//! structured fields. This module turns a [`KernelConfig`] into a concrete
//! subscriber installation, so a host binary gets output matched to how the
//! kernel is configured instead of hand-assembling filters:
//!
//! - `dev_mode` wants everything the kernel can say, human-readable, from
//!   every crate (`TRACE`, pretty).
//! - a production config with `tracing_enabled` keeps structured kernel
//!   events flowing as JSON lines, filtered to the kernel target (`DEBUG`).
//! - `tracing_enabled = false` quiets the kernel down to warnings.
//!
//! Installation needs a formatting backend; build with `logging-json` or
//! `logging-pretty` to pull one in. Without a backend, plans can still be
//! derived and inspected but [`SubscriberPlan::install`] reports `false`.
//!
//! ```rust,ignore
//! use keystone_di::{logging, KernelConfig};
//!
//! let config = KernelConfig::builder().dev_mode(true).build();
//! logging::init_from_config(&config);
//! ```

use crate::kernel::KernelConfig;
use tracing::Level;

/// Output shape of an installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Machine-parseable JSON lines, one event per line.
    #[default]
    Json,
    /// Human-oriented multi-line output for development.
    Pretty,
}

/// What an installation will do, derived before any global state is touched.
///
/// Keeping the decision separate from the installation makes the mapping from
/// config to output testable without installing a global subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberPlan {
    pub level: Level,
    pub format: LogFormat,
    /// Restrict output to events from the kernel target.
    pub kernel_only: bool,
}

impl SubscriberPlan {
    /// Derive the plan a kernel config asks for.
    pub fn for_config(config: &KernelConfig) -> Self {
        let level = if config.dev_mode {
            Level::TRACE
        } else if config.tracing_enabled {
            Level::DEBUG
        } else {
            Level::WARN
        };
        Self {
            level,
            format: if config.dev_mode {
                LogFormat::Pretty
            } else {
                LogFormat::Json
            },
            kernel_only: !config.dev_mode,
        }
    }

    /// The env-filter directive this plan translates to.
    pub fn directive(&self) -> String {
        if self.kernel_only {
            format!("keystone_di={}", self.level)
        } else {
            self.level.to_string()
        }
    }

    /// Install a global subscriber for this plan.
    ///
    /// Returns `false` when another subscriber is already installed or when
    /// the crate was built without a formatting backend.
    pub fn install(&self) -> bool {
        install_plan(self)
    }
}

/// Derive and install a subscriber matching `config`.
pub fn init_from_config(config: &KernelConfig) -> bool {
    SubscriberPlan::for_config(config).install()
}

/// Install a subscriber for the default kernel config.
pub fn init() -> bool {
    init_from_config(&KernelConfig::default())
}

#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
fn install_plan(plan: &SubscriberPlan) -> bool {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::new(plan.directive());
    let registry = tracing_subscriber::registry().with(filter);

    match plan.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(true))
            .try_init()
            .is_ok(),
        LogFormat::Json => {
            #[cfg(feature = "logging-json")]
            {
                registry
                    .with(fmt::layer().json().with_target(true))
                    .try_init()
                    .is_ok()
            }
            #[cfg(not(feature = "logging-json"))]
            {
                // JSON was not compiled in; compact single-line output is the
                // closest machine-friendly shape available.
                registry
                    .with(fmt::layer().compact().with_target(true))
                    .try_init()
                    .is_ok()
            }
        }
    }
}

#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
fn install_plan(_plan: &SubscriberPlan) -> bool {
    // No formatting backend compiled in.
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_plan_is_loud_and_pretty() {
        let config = KernelConfig::builder().dev_mode(true).build();
        let plan = SubscriberPlan::for_config(&config);

        assert_eq!(plan.level, Level::TRACE);
        assert_eq!(plan.format, LogFormat::Pretty);
        assert!(!plan.kernel_only);
        assert_eq!(plan.directive(), "TRACE");
    }

    #[test]
    fn test_default_plan_scopes_json_to_kernel_target() {
        let plan = SubscriberPlan::for_config(&KernelConfig::default());

        assert_eq!(plan.level, Level::DEBUG);
        assert_eq!(plan.format, LogFormat::Json);
        assert!(plan.kernel_only);
        assert_eq!(plan.directive(), "keystone_di=DEBUG");
    }

    #[test]
    fn test_disabled_tracing_quiets_to_warn() {
        let config = KernelConfig::builder().tracing_enabled(false).build();
        let plan = SubscriberPlan::for_config(&config);
        assert_eq!(plan.level, Level::WARN);
    }

    #[test]
    fn test_install_never_succeeds_twice() {
        let first = init();
        let second = init();
        // With a backend, only the first install can win; without one,
        // neither does.
        assert!(!(first && second));
    }
}
