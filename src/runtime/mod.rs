//! V8 bridge between the editor's values and JavaScript.
//!
//! Host lists and dictionaries are exposed to scripts as live proxies, and
//! script values are converted back into host values on assignment. Each
//! [`ScriptHost`] owns one `deno_core` runtime and the bridge state bound to
//! its isolate; [`PluginHandle`] adds the boundary semantics of the plugin's
//! `init` / `execute` entry points.

pub mod bridge;
pub mod cache;
pub mod config;
mod conversion;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod host;
mod host_expr;
pub mod host_value;
pub mod logging;
pub mod memory_host;
mod proxy;
pub mod registry;
pub mod runner;
pub mod vim_host;
pub mod vim_sys;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

/// V8 flags in effect for this process.
///
/// V8 reads its flags once, before the first isolate is created, so only the
/// flags of the first runtime take effect.
static V8_FLAGS: OnceCell<Vec<String>> = OnceCell::new();

/// Apply V8 flags exactly once.
///
/// This function is safe to call multiple times; subsequent calls are no-ops.
/// It must be called before creating any runtimes.
pub fn initialize_flags_once(flags: &[String]) {
    V8_FLAGS.get_or_init(|| {
        // Enable GC exposure for testing and debugging
        let mut argv = vec!["vim-v8".to_string(), "--expose-gc".to_string()];
        argv.extend(flags.iter().cloned());

        // The first entry that comes back is argv[0].
        let unrecognized: Vec<String> = deno_core::v8_set_flags(argv.clone())
            .into_iter()
            .skip(1)
            .collect();
        for flag in &unrecognized {
            warn!(flag = %flag, "unrecognized V8 flag");
        }
        debug!(flags = ?&argv[1..], "V8 flags applied");
        argv.into_iter()
            .skip(1)
            .filter(|flag| !unrecognized.contains(flag))
            .collect()
    });
}

/// The flags applied by [`initialize_flags_once`], if it has run.
pub fn applied_flags() -> Option<&'static [String]> {
    V8_FLAGS.get().map(Vec::as_slice)
}

// Re-export key types for convenience
pub use config::BridgeConfig;
pub use diagnostics::Diagnostic;
pub use error::{BridgeError, BridgeResult};
pub use handle::PluginHandle;
pub use host::HostServices;
pub use host_value::{DictId, HostValue, ListId};
pub use memory_host::MemoryHost;
pub use runner::ScriptHost;
pub use vim_host::VimHost;

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn script_host(config: &BridgeConfig) -> (Rc<MemoryHost>, ScriptHost) {
        let host = Rc::new(MemoryHost::new());
        let script = ScriptHost::new(host.clone(), config).unwrap();
        (host, script)
    }

    #[test]
    fn test_flags_initialization() {
        initialize_flags_once(&[]);
        let flags = applied_flags().unwrap();
        assert!(flags.iter().any(|flag| flag == "--expose-gc"));

        // Should be safe to call again
        initialize_flags_once(&["--no-such-flag-anywhere".to_string()]);
        assert_eq!(applied_flags().unwrap(), flags);
    }

    #[test]
    fn test_runtime_lifecycle() {
        let (_host, mut script) = script_host(&BridgeConfig::default());
        assert_eq!(script.evaluate("40 + 2").unwrap(), HostValue::Number(42));
        assert!(script.execute("var x = 1;").unwrap().is_none());
    }

    #[test]
    fn test_multiple_runtimes_sequential() {
        for i in 0..3 {
            let (host, mut script) = script_host(&BridgeConfig::default());
            script.execute(&format!("vim.g.n = {} * 2", i)).unwrap();
            assert_eq!(host.eval("g:n").unwrap(), HostValue::Number(i * 2));
        }
    }

    #[test]
    fn test_runtime_with_heap_limits() {
        let config = BridgeConfig::new()
            .with_max_heap_size(10 * 1024 * 1024) // 10 MB
            .with_initial_heap_size(1024 * 1024); // 1 MB
        let (_host, mut script) = script_host(&config);
        assert_eq!(script.evaluate("'hello'").unwrap(), HostValue::string("hello"));
    }

    #[test]
    fn test_invalid_heap_limits_are_rejected() {
        let host = Rc::new(MemoryHost::new());
        let config = BridgeConfig::new().with_initial_heap_size(1024);
        assert!(matches!(
            ScriptHost::new(host, &config),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_runtime_with_bootstrap() {
        let config = BridgeConfig::new().with_bootstrap("globalThis.VERSION = '1.0.0';");
        let (_host, mut script) = script_host(&config);
        assert_eq!(
            script.evaluate("globalThis.VERSION").unwrap(),
            HostValue::string("1.0.0")
        );
    }

    #[test]
    fn test_failing_bootstrap() {
        let host = Rc::new(MemoryHost::new());
        let config = BridgeConfig::new().with_bootstrap("throw new Error('nope')");
        let err = ScriptHost::new(host, &config).err().unwrap();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_runtime_state_persistence() {
        let (_host, mut script) = script_host(&BridgeConfig::default());

        // Set a variable
        script.execute("var counter = 0;").unwrap();

        // Increment it
        assert_eq!(script.evaluate("++counter").unwrap(), HostValue::Number(1));

        // Verify persistence
        assert_eq!(script.evaluate("counter").unwrap(), HostValue::Number(1));
    }
}
