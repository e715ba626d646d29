//! Network topology tracking.
//!
//! The topology is a tree rooted at the local server: every node carries a
//! parent pointer (`uplink`) naming the SID it was learned from. Routing
//! climbs parents to the direct peer; netsplit cleanup walks the subtree
//! under a lost edge.

use dashmap::DashMap;
use munin_proto::irc_to_lower;

/// One server in the network.
#[derive(Debug, Clone)]
pub struct LinkedServer {
    pub sid: String,
    pub name: String,
    pub description: String,
    /// Hops from the local server; 0 for ourselves.
    pub hop_count: u8,
    /// The SID this server hangs off; `None` for the local server.
    pub uplink: Option<String>,
    /// Whether we own the S2S connection to this server.
    pub is_direct: bool,
}

/// The spanning tree of known servers.
#[derive(Debug)]
pub struct Topology {
    servers: DashMap<String, LinkedServer>,
    /// Folded name to SID.
    names: DashMap<String, String>,
    local_sid: String,
}

impl Topology {
    /// Create a topology seeded with the local server.
    pub fn new(local_sid: &str, local_name: &str, description: &str) -> Topology {
        let topology = Topology {
            servers: DashMap::new(),
            names: DashMap::new(),
            local_sid: local_sid.to_string(),
        };
        topology.servers.insert(
            local_sid.to_string(),
            LinkedServer {
                sid: local_sid.to_string(),
                name: local_name.to_string(),
                description: description.to_string(),
                hop_count: 0,
                uplink: None,
                is_direct: false,
            },
        );
        topology
            .names
            .insert(irc_to_lower(local_name), local_sid.to_string());
        topology
    }

    /// Register a server. Refused when the SID or name is already present.
    pub fn add_server(&self, server: LinkedServer) -> bool {
        let folded = irc_to_lower(&server.name);
        if self.servers.contains_key(&server.sid) || self.names.contains_key(&folded) {
            return false;
        }
        self.names.insert(folded, server.sid.clone());
        self.servers.insert(server.sid.clone(), server);
        true
    }

    /// Remove one server.
    pub fn remove_server(&self, sid: &str) -> Option<LinkedServer> {
        let removed = self.servers.remove(sid).map(|(_, info)| info);
        if let Some(info) = &removed {
            self.names.remove(&irc_to_lower(&info.name));
        }
        removed
    }

    pub fn contains_sid(&self, sid: &str) -> bool {
        self.servers.contains_key(sid)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(&irc_to_lower(name))
    }

    pub fn get(&self, sid: &str) -> Option<LinkedServer> {
        self.servers.get(sid).map(|e| e.value().clone())
    }

    pub fn sid_by_name(&self, name: &str) -> Option<String> {
        self.names.get(&irc_to_lower(name)).map(|e| e.value().clone())
    }

    /// All servers, local included.
    pub fn all(&self) -> Vec<LinkedServer> {
        self.servers.iter().map(|e| e.value().clone()).collect()
    }

    /// Count, local included.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// The direct peer on the route toward `target_sid`, or `None` if the
    /// target is unknown, local, or itself direct without a path.
    ///
    /// Climbs uplink pointers; the node whose uplink is the local server
    /// is the direct peer.
    pub fn route_to(&self, target_sid: &str, local_sid: &str) -> Option<String> {
        let mut current = target_sid.to_string();
        // Bounded climb: the tree cannot be deeper than its node count.
        for _ in 0..=self.servers.len() {
            let uplink = self.servers.get(&current)?.uplink.clone();
            match uplink {
                None => return None, // reached the local root
                Some(up) if up == local_sid => return Some(current),
                Some(up) => current = up,
            }
        }
        None
    }

    /// The subtree rooted at `sid`: the server itself plus everything that
    /// routes through it, deepest entries last. Netsplit removal iterates
    /// this in reverse.
    pub fn downstream_sids(&self, sid: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue = vec![sid.to_string()];
        let mut seen = std::collections::HashSet::new();

        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());
            for entry in self.servers.iter() {
                if entry.value().uplink.as_deref() == Some(current.as_str())
                    && !seen.contains(&entry.value().sid)
                {
                    queue.push(entry.value().sid.clone());
                }
            }
        }

        result
    }

    /// Remove a set of servers (netsplit cleanup).
    pub fn remove_servers(&self, sids: &[String]) {
        for sid in sids {
            if sid != &self.local_sid {
                self.remove_server(sid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(sid: &str, name: &str, hop: u8, uplink: Option<&str>, direct: bool) -> LinkedServer {
        LinkedServer {
            sid: sid.into(),
            name: name.into(),
            description: String::new(),
            hop_count: hop,
            uplink: uplink.map(str::to_string),
            is_direct: direct,
        }
    }

    fn linear() -> Topology {
        // 001 (local) - 00A - 00B - 00C
        let t = Topology::new("001", "local.example", "local");
        t.add_server(server("00A", "a.example", 1, Some("001"), true));
        t.add_server(server("00B", "b.example", 2, Some("00A"), false));
        t.add_server(server("00C", "c.example", 3, Some("00B"), false));
        t
    }

    #[test]
    fn duplicate_sid_or_name_refused() {
        let t = linear();
        assert!(!t.add_server(server("00A", "other.example", 1, Some("001"), true)));
        assert!(!t.add_server(server("00Z", "A.EXAMPLE", 1, Some("001"), true)));
    }

    #[test]
    fn downstream_linear() {
        let t = linear();
        let down = t.downstream_sids("00A");
        assert_eq!(down.len(), 3);
        assert!(down.contains(&"00A".to_string()));
        assert!(down.contains(&"00B".to_string()));
        assert!(down.contains(&"00C".to_string()));
        assert!(!down.contains(&"001".to_string()));
    }

    #[test]
    fn downstream_tree_keeps_siblings() {
        let t = linear();
        t.add_server(server("00D", "d.example", 1, Some("001"), true));
        let down = t.downstream_sids("00A");
        assert!(!down.contains(&"00D".to_string()));
        assert_eq!(t.downstream_sids("00C"), vec!["00C".to_string()]);
    }

    #[test]
    fn route_climbs_to_direct_peer() {
        let t = linear();
        assert_eq!(t.route_to("00C", "001"), Some("00A".to_string()));
        assert_eq!(t.route_to("00B", "001"), Some("00A".to_string()));
        assert_eq!(t.route_to("00A", "001"), Some("00A".to_string()));
        assert_eq!(t.route_to("001", "001"), None);
        assert_eq!(t.route_to("0ZZ", "001"), None);
    }

    #[test]
    fn name_lookup_is_casemapped() {
        let t = linear();
        assert_eq!(t.sid_by_name("B.EXAMPLE"), Some("00B".to_string()));
    }

    #[test]
    fn removal_cleans_name_index() {
        let t = linear();
        t.remove_servers(&["00B".to_string(), "00C".to_string()]);
        assert!(!t.contains_sid("00B"));
        assert!(!t.contains_name("c.example"));
        assert!(t.contains_sid("001"), "local server never removed");
    }
}
