//! Boundary semantics of the plugin's two entry points.

use crate::runtime::config::BridgeConfig;
use crate::runtime::error::{BridgeError, BridgeResult};
use crate::runtime::host::HostServices;
use crate::runtime::logging;
use crate::runtime::runner::ScriptHost;
use crate::runtime::vim_host::VimHost;
use libloading::Library;
use std::rc::Rc;
use tracing::{debug, info};

struct Plugin {
    config: BridgeConfig,
    script: ScriptHost,
    // Dropped last so the code of the callbacks stays mapped while the
    // runtime tears down.
    _library: Option<Library>,
}

/// The state behind `init` / `execute`: empty until a successful `init`.
#[derive(Default)]
pub struct PluginHandle {
    plugin: Option<Plugin>,
}

impl PluginHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize against the running editor. A second call after a
    /// successful one does nothing.
    pub fn init(&mut self, args: &str) -> BridgeResult<()> {
        if self.plugin.is_some() {
            return Ok(());
        }
        let config = BridgeConfig::parse_init_args(args)?.with_process_env();
        logging::init_logging(&config)?;

        // The editor unloads the library after every call unless someone
        // else holds it open.
        let library = match &config.library {
            Some(path) => Some(unsafe {
                Library::new(path).map_err(|err| BridgeError::Library(err.to_string()))?
            }),
            None => None,
        };
        let host = VimHost::load()?;
        self.start(Rc::new(host), config, library)
    }

    /// Initialize against an arbitrary host.
    pub fn init_with_host(
        &mut self,
        host: Rc<dyn HostServices>,
        config: BridgeConfig,
    ) -> BridgeResult<()> {
        if self.plugin.is_some() {
            return Ok(());
        }
        self.start(host, config, None)
    }

    fn start(
        &mut self,
        host: Rc<dyn HostServices>,
        config: BridgeConfig,
        library: Option<Library>,
    ) -> BridgeResult<()> {
        let script = ScriptHost::new(host, &config)?;
        info!(
            library = ?config.library,
            flags = config.flags.as_deref().unwrap_or(""),
            "plugin initialized"
        );
        self.plugin = Some(Plugin {
            config,
            script,
            _library: library,
        });
        Ok(())
    }

    /// Run `expr`. Script failures are reported through the editor's error
    /// variable, not as an error here.
    pub fn execute(&mut self, expr: &str) -> BridgeResult<()> {
        let plugin = self.plugin.as_mut().ok_or(BridgeError::NotInitialized)?;
        plugin.script.execute(expr)?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.plugin.is_some()
    }

    pub fn config(&self) -> Option<&BridgeConfig> {
        self.plugin.as_ref().map(|plugin| &plugin.config)
    }

    pub fn script_host(&mut self) -> Option<&mut ScriptHost> {
        self.plugin.as_mut().map(|plugin| &mut plugin.script)
    }

    /// Tear the runtime down and return to the uninitialized state.
    pub fn shutdown(&mut self) {
        if self.plugin.take().is_some() {
            debug!("plugin shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::host::reserved;
    use crate::runtime::host_value::HostValue;
    use crate::runtime::memory_host::MemoryHost;

    #[test]
    fn test_execute_before_init() {
        let mut handle = PluginHandle::new();
        let err = handle.execute("1").unwrap_err();
        assert!(matches!(err, BridgeError::NotInitialized));
        assert_eq!(err.to_string(), "not initialized");
    }

    #[test]
    fn test_bad_library_leaves_handle_uninitialized() {
        let mut handle = PluginHandle::new();
        let err = handle.init("/nonexistent/vim-v8/if_v8.so").unwrap_err();
        assert!(matches!(err, BridgeError::Library(_)));
        assert!(!handle.is_initialized());
        assert!(matches!(handle.execute("1"), Err(BridgeError::NotInitialized)));
    }

    #[test]
    fn test_missing_editor_symbols() {
        let mut handle = PluginHandle::new();
        let err = handle.init("").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::MissingSymbol { name: "eval_expr" }
        ));
        assert!(!handle.is_initialized());
    }

    #[test]
    fn test_second_init_is_a_no_op() {
        let host = Rc::new(MemoryHost::new());
        let mut handle = PluginHandle::new();
        handle
            .init_with_host(host.clone(), BridgeConfig::default())
            .unwrap();
        handle.execute("vim.g.first = 1").unwrap();

        handle
            .init_with_host(host.clone(), BridgeConfig::default().with_max_depth(1))
            .unwrap();
        assert_eq!(handle.config().map(|c| c.max_depth), Some(100));
        // Already initialized, so the argument string is never looked at.
        handle.init("/nonexistent/vim-v8/if_v8.so").unwrap();
        assert_eq!(host.eval("g:first").unwrap(), HostValue::Number(1));
    }

    #[test]
    fn test_script_errors_go_to_errmsg() {
        let host = Rc::new(MemoryHost::new());
        let mut handle = PluginHandle::new();
        handle
            .init_with_host(host.clone(), BridgeConfig::default())
            .unwrap();

        handle.execute("throw new Error('boom')").unwrap();
        let errmsg = host.special_string(reserved::ERRMSG).unwrap();
        assert!(errmsg.starts_with("<execute>:1: Error: boom"));

        handle.execute("vim.g.ok = 'yes'").unwrap();
        assert_eq!(host.special_string(reserved::ERRMSG).as_deref(), Some(""));
    }

    #[test]
    fn test_shutdown_releases_runtime() {
        let host = Rc::new(MemoryHost::new());
        let baseline = host.live_containers();
        let mut handle = PluginHandle::new();
        handle
            .init_with_host(host.clone(), BridgeConfig::default())
            .unwrap();
        handle.execute("var l = new vim.List(); l.push(1, 2)").unwrap();
        handle.shutdown();
        assert!(!handle.is_initialized());
        assert_eq!(host.live_containers(), baseline);
        assert!(matches!(handle.execute("1"), Err(BridgeError::NotInitialized)));
    }
}
