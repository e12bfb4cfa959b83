//! Round-robin host selection for a backend.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Add a scheme when missing and drop trailing slashes.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Rotates through a backend's hosts.
#[derive(Debug, Default)]
pub struct HostSelector {
    hosts: Vec<String>,
    counter: AtomicUsize,
}

impl HostSelector {
    pub fn new(hosts: &[String]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| normalize_host(h)).collect(),
            counter: AtomicUsize::new(0),
        }
    }

    /// Next host in rotation, or `None` when the backend has no hosts.
    pub fn next_host(&self) -> Option<&str> {
        if self.hosts.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        Some(&self.hosts[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let selector =
            HostSelector::new(&["10.0.0.1:80".into(), "https://api.example.com/".into()]);
        assert_eq!(selector.next_host(), Some("http://10.0.0.1:80"));
        assert_eq!(selector.next_host(), Some("https://api.example.com"));
        assert_eq!(selector.next_host(), Some("http://10.0.0.1:80"));
    }

    #[test]
    fn test_empty() {
        assert_eq!(HostSelector::new(&[]).next_host(), None);
    }
}
