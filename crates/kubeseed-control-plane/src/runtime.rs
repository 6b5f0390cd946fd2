//! Runtime handles produced by a bootstrap run.

use std::fmt;

use kubeseed_core::RuntimeLayout;

/// Everything later startup phases need from the bootstrap: where the
/// artifacts live and the credentials read back from disk.
#[derive(Clone)]
pub struct ControlRuntime {
    /// Resolved artifact paths.
    pub layout: RuntimeLayout,

    /// `node:<secret>` when a node credential exists.
    pub agent_token: Option<String>,

    /// `server:<secret>` when a server credential exists.
    pub server_token: Option<String>,

    /// Pre-shared key for encrypted pod networking.
    pub ipsec_psk: String,
}

impl ControlRuntime {
    pub fn new(layout: RuntimeLayout) -> Self {
        Self {
            layout,
            agent_token: None,
            server_token: None,
            ipsec_psk: String::new(),
        }
    }
}

// Secrets are never printed
impl fmt::Debug for ControlRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ControlRuntime")
            .field("data_dir", &self.layout.data_dir)
            .field("agent_token", &redact(&self.agent_token))
            .field("server_token", &redact(&self.server_token))
            .field("ipsec_psk", &"<redacted>")
            .finish()
    }
}
