use std::net::TcpListener;

use crate::spawn::SpawnConfig;

/// How many ports above the base are tried before giving up.
const PORT_SCAN_RANGE: u16 = 100;

/// Command line for one `opencode serve` HTTP server.
#[derive(Debug, Clone, Default)]
pub struct OpenCodeConfig {
    pub binary_path: String,
    pub working_dir: String,
    pub port: u16,
    pub shell_prefix: Option<String>,
}

impl OpenCodeConfig {
    pub fn build(self) -> SpawnConfig {
        let args = vec![
            "serve".to_string(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        SpawnConfig::new(self.binary_path, args)
            .working_dir(self.working_dir)
            .shell_prefix(self.shell_prefix)
            .no_stdin()
    }
}

/// First port at or above `base` that can be bound on loopback.
pub fn find_available_port(base: u16) -> Option<u16> {
    (base..base.saturating_add(PORT_SCAN_RANGE))
        .find(|port| TcpListener::bind(("127.0.0.1", *port)).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_on_port() {
        let spawn = OpenCodeConfig {
            binary_path: "/usr/bin/opencode".to_string(),
            working_dir: "/repo".to_string(),
            port: 14096,
            shell_prefix: None,
        }
        .build();
        assert_eq!(spawn.args, ["serve", "--port", "14096"]);
        assert_eq!(spawn.working_dir.as_deref(), Some("/repo"));
        assert!(!spawn.uses_stdin);
    }

    #[test]
    fn skips_ports_in_use() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let found = find_available_port(port).unwrap();
        assert_ne!(found, port);
        assert!(found > port);
    }
}
