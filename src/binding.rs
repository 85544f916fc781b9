//! Binding configuration and the routing state shared by its clients.
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

/// Credentials for the SASL handshake run ahead of every request.
#[derive(Clone, Debug, PartialEq)]
pub struct SaslConfig {
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

impl SaslConfig {
    pub fn plain(username: &str, password: &str) -> Self {
        SaslConfig {
            mechanism: "plain".to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
        }
    }
}

/// Sends matching topics or groups to the network binding `exit_id`.
///
/// Patterns are globs where `*` stands for any run of characters, an
/// absent pattern matches everything.
#[derive(Clone, Debug, PartialEq)]
pub struct KafkaRoute {
    pub exit_id: u64,
    pub topic: Option<String>,
    pub group_id: Option<String>,
}

impl KafkaRoute {
    pub fn new(exit_id: u64) -> Self {
        KafkaRoute {
            exit_id,
            topic: None,
            group_id: None,
        }
    }

    pub fn topic(mut self, pattern: &str) -> Self {
        self.topic = Some(pattern.to_owned());
        self
    }

    pub fn group_id(mut self, pattern: &str) -> Self {
        self.group_id = Some(pattern.to_owned());
        self
    }

    fn matches_topic(&self, topic: &str) -> bool {
        self.topic
            .as_deref()
            .map_or(true, |pattern| glob_match(pattern, topic))
    }

    fn matches_group(&self, group_id: &str) -> bool {
        self.group_id
            .as_deref()
            .map_or(true, |pattern| glob_match(pattern, group_id))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KafkaBinding {
    pub id: u64,
    pub routes: Vec<KafkaRoute>,
    pub sasl: Option<SaslConfig>,
}

impl KafkaBinding {
    pub fn new(id: u64) -> Self {
        KafkaBinding {
            id,
            routes: vec![],
            sasl: None,
        }
    }

    pub fn route(mut self, route: KafkaRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn sasl(mut self, sasl: SaslConfig) -> Self {
        self.sasl = Some(sasl);
        self
    }

    /// First route whose topic pattern matches.
    pub fn resolve(&self, topic: &str) -> Option<&KafkaRoute> {
        self.routes.iter().find(|route| route.matches_topic(topic))
    }

    /// First route whose group pattern matches.
    pub fn resolve_group(&self, group_id: &str) -> Option<&KafkaRoute> {
        self.routes.iter().find(|route| route.matches_group(group_id))
    }
}

pub fn glob_match(pattern: &str, value: &str) -> bool {
    let pattern = pattern.as_bytes();
    let value = value.as_bytes();
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, v));
            p += 1;
        } else if p < pattern.len() && pattern[p] == value[v] {
            p += 1;
            v += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            v = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|b| *b == b'*')
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerInfo {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

/// What the clients of one exit know about the cluster behind it.
#[derive(Debug, Default)]
pub struct ClientRoute {
    pub exit_id: u64,
    pub brokers: BTreeMap<i32, BrokerInfo>,
    /// Partition id to leader id, per topic.
    pub partitions: HashMap<String, BTreeMap<i32, i32>>,
    /// Initial id of the meta stream keeping `partitions` fresh, poked
    /// when a fetch learns its leader moved.
    pub meta_initial_id: Option<u64>,
}

impl ClientRoute {
    pub fn leader(&self, topic: &str, partition_id: i32) -> Option<i32> {
        self.partitions
            .get(topic)
            .and_then(|partitions| partitions.get(&partition_id))
            .copied()
    }

    pub fn broker(&self, node_id: i32) -> Option<&BrokerInfo> {
        self.brokers.get(&node_id)
    }
}

pub type ClientRouteRef = Rc<RefCell<ClientRoute>>;

#[derive(Debug, Default)]
pub struct ClientRoutes {
    routes: HashMap<u64, ClientRouteRef>,
}

impl ClientRoutes {
    pub fn supply(&mut self, exit_id: u64) -> ClientRouteRef {
        Rc::clone(self.routes.entry(exit_id).or_insert_with(|| {
            Rc::new(RefCell::new(ClientRoute {
                exit_id,
                ..Default::default()
            }))
        }))
    }
}

/// Consumer group identity kept for as long as the binding is attached,
/// so a stream that replaces another rejoins as the same member.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMembership {
    pub instance_id: String,
    pub member_ids: HashMap<String, String>,
}

impl GroupMembership {
    pub fn new(instance_id: &str) -> Self {
        GroupMembership {
            instance_id: instance_id.to_owned(),
            member_ids: HashMap::new(),
        }
    }

    /// Member id to join with, empty when the broker has not assigned one.
    pub fn member_id(&self, group_id: &str) -> String {
        self.member_ids.get(group_id).cloned().unwrap_or_default()
    }
}

pub type GroupMembershipRef = Rc<RefCell<GroupMembership>>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn glob() {
        assert!(glob_match("*", "orders"));
        assert!(glob_match("ord*", "orders"));
        assert!(glob_match("*ers", "orders"));
        assert!(glob_match("o*d*s", "orders"));
        assert!(!glob_match("ord*x", "orders"));
        assert!(glob_match("orders", "orders"));
        assert!(!glob_match("orders", "orders2"));
    }

    #[test]
    fn resolve_first_matching_route() {
        let binding = KafkaBinding::new(1)
            .route(KafkaRoute::new(10).topic("events.*"))
            .route(KafkaRoute::new(20).group_id("analytics"));

        assert_eq!(binding.resolve("events.clicks").map(|r| r.exit_id), Some(10));
        assert_eq!(binding.resolve("orders").map(|r| r.exit_id), Some(20));
        assert_eq!(binding.resolve_group("analytics").map(|r| r.exit_id), Some(10));
    }

    #[test]
    fn client_routes_are_shared_per_exit() {
        let mut routes = ClientRoutes::default();
        routes
            .supply(10)
            .borrow_mut()
            .partitions
            .entry("orders".to_owned())
            .or_default()
            .insert(0, 3);

        assert_eq!(routes.supply(10).borrow().leader("orders", 0), Some(3));
        assert_eq!(routes.supply(11).borrow().leader("orders", 0), None);
    }
}
