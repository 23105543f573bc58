use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Software name sent back in the `CONN` reply.
    pub software_name: String,
    pub max_clients: usize,
    /// When false the engine never answers `CONN`, which lets clients run
    /// into their handshake timeout.
    pub answer_handshake: bool,
    /// Reflect every received `vis.val` back to its sender.
    pub echo_visibility: bool,
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            software_name: "OpenSpace".to_string(),
            max_clients: 8,
            answer_handshake: true,
            echo_visibility: false,
            poll_interval: Duration::from_millis(1),
        }
    }
}
