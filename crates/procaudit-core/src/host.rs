use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Application namespace for derived identifiers.
const APP_NAMESPACE: Uuid = uuid::uuid!("a86148b4-19e2-4533-a16f-3f3e96e92848");

/// Identity of the monitored host, computed once at startup and passed
/// explicitly to whoever needs it.
#[derive(Debug, Clone, Serialize)]
pub struct Host {
    pub id: Uuid,
    pub hostname: String,
    pub os: Os,
}

#[derive(Debug, Clone, Serialize)]
pub struct Os {
    #[serde(rename = "type")]
    pub kind: String,
    pub arch: String,
}

impl Host {
    pub fn detect() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        Self {
            id: host_id(&hostname),
            hostname,
            os: Os {
                kind: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            },
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}/{})",
            self.id, self.hostname, self.os.kind, self.os.arch
        )
    }
}

/// Stable host identifier: UUIDv5 of the machine id under the
/// application namespace, falling back to the hostname when the machine
/// id is unreadable.
fn host_id(hostname: &str) -> Uuid {
    let machine_id = std::fs::read_to_string("/etc/machine-id")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty());
    match machine_id {
        Some(id) => Uuid::new_v5(&APP_NAMESPACE, id.as_bytes()),
        None => {
            log::warn!("machine id unreadable, deriving host id from hostname");
            Uuid::new_v5(&APP_NAMESPACE, hostname.as_bytes())
        }
    }
}
