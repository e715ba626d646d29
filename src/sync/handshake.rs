//! The TS6 handshake state machine.
//!
//! Both sides send `PASS <pw> TS 6 :<sid>`, `CAPAB :<caps>`, and
//! `SERVER <name> 1 :<desc>`; neither proceeds until all three of the
//! peer's lines have arrived and validated. Passwords compare in constant
//! time; a duplicate name or SID is refused before burst.

use crate::config::LinkBlock;
use crate::error::LinkError;
use crate::state::ServerInfo;
use munin_proto::Message;
use subtle::ConstantTimeEq;

/// Capabilities we require from every peer.
pub const REQUIRED_CAPS: &[&str] = &["QS", "ENCAP", "EX", "CHW", "IE", "EUID", "TB"];

/// What the peer has told us so far.
#[derive(Debug, Default)]
pub struct HandshakeMachine {
    pub remote_pass: Option<String>,
    pub remote_sid: Option<String>,
    pub remote_caps: Option<Vec<String>>,
    pub remote_name: Option<String>,
    pub remote_description: Option<String>,
}

impl HandshakeMachine {
    pub fn new() -> HandshakeMachine {
        HandshakeMachine::default()
    }

    /// The three lines we send for ourselves.
    pub fn local_lines(link: &LinkBlock, local: &ServerInfo) -> Vec<Message> {
        vec![
            Message::new(
                "PASS",
                vec![
                    link.send_password.clone(),
                    "TS".to_string(),
                    "6".to_string(),
                    local.sid.clone(),
                ],
            ),
            Message::new("CAPAB", vec![REQUIRED_CAPS.join(" ")]),
            Message::new(
                "SERVER",
                vec![
                    local.name.clone(),
                    "1".to_string(),
                    local.description.clone(),
                ],
            ),
        ]
    }

    /// Feed one line from the peer. Anything else before completion is a
    /// protocol violation.
    pub fn step(&mut self, msg: &Message) -> Result<(), LinkError> {
        match msg.command.as_str() {
            "PASS" => {
                // PASS <password> TS <version> :<sid>
                if msg.params.len() < 4 || msg.params[1] != "TS" || msg.params[2] != "6" {
                    return Err(LinkError::Protocol(format!(
                        "bad PASS line: {:?}",
                        msg.params
                    )));
                }
                self.remote_pass = Some(msg.params[0].clone());
                self.remote_sid = Some(msg.params[3].clone());
            }
            "CAPAB" => {
                let caps = msg
                    .params
                    .iter()
                    .flat_map(|p| p.split_whitespace())
                    .map(str::to_string)
                    .collect();
                self.remote_caps = Some(caps);
            }
            "SERVER" => {
                if msg.params.is_empty() {
                    return Err(LinkError::Protocol("SERVER without a name".to_string()));
                }
                self.remote_name = Some(msg.params[0].clone());
                self.remote_description = Some(msg.params.last().cloned().unwrap_or_default());
            }
            "ERROR" => {
                return Err(LinkError::Protocol(format!(
                    "peer sent ERROR: {}",
                    msg.params.first().cloned().unwrap_or_default()
                )));
            }
            other => {
                return Err(LinkError::Protocol(format!(
                    "unexpected {other} during handshake"
                )));
            }
        }
        Ok(())
    }

    /// All three peer lines received?
    pub fn complete(&self) -> bool {
        self.remote_pass.is_some() && self.remote_caps.is_some() && self.remote_name.is_some()
    }

    /// Validate the completed handshake against our link blocks. Returns
    /// the matching block.
    pub fn validate<'a>(&self, links: &'a [LinkBlock]) -> Result<&'a LinkBlock, LinkError> {
        let name = self
            .remote_name
            .as_ref()
            .ok_or_else(|| LinkError::Protocol("handshake incomplete".to_string()))?;
        let pass = self
            .remote_pass
            .as_ref()
            .ok_or_else(|| LinkError::Protocol("handshake incomplete".to_string()))?;
        let sid = self
            .remote_sid
            .as_ref()
            .ok_or_else(|| LinkError::Protocol("handshake incomplete".to_string()))?;
        let caps = self
            .remote_caps
            .as_ref()
            .ok_or_else(|| LinkError::Protocol("handshake incomplete".to_string()))?;

        let link = links
            .iter()
            .find(|l| &l.name == name)
            .ok_or_else(|| LinkError::UnknownServer(name.clone()))?;

        let pass_ok: bool = pass
            .as_bytes()
            .ct_eq(link.receive_password.as_bytes())
            .into();
        if !pass_ok {
            return Err(LinkError::BadPassword(name.clone()));
        }

        if let Some(expected_sid) = &link.sid {
            if expected_sid != sid {
                return Err(LinkError::Protocol(format!(
                    "expected SID {expected_sid}, peer claims {sid}"
                )));
            }
        }

        let missing: Vec<&str> = REQUIRED_CAPS
            .iter()
            .copied()
            .filter(|required| !caps.iter().any(|c| c == required))
            .collect();
        if !missing.is_empty() {
            return Err(LinkError::MissingCaps(missing.join(" ")));
        }

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> LinkBlock {
        toml::from_str(
            r#"
            name = "hub.example.org"
            hostname = "10.0.0.2"
            port = 7000
            send_password = "out"
            receive_password = "in"
            "#,
        )
        .unwrap()
    }

    fn feed_valid(machine: &mut HandshakeMachine, pass: &str) {
        machine
            .step(&"PASS pw TS 6 :002".replace("pw", pass).parse().unwrap())
            .unwrap();
        machine
            .step(&format!("CAPAB :{}", REQUIRED_CAPS.join(" ")).parse().unwrap())
            .unwrap();
        machine
            .step(&"SERVER hub.example.org 1 :A hub".parse().unwrap())
            .unwrap();
    }

    #[test]
    fn happy_path() {
        let mut machine = HandshakeMachine::new();
        assert!(!machine.complete());
        feed_valid(&mut machine, "in");
        assert!(machine.complete());
        let links = vec![link()];
        let matched = machine.validate(&links).unwrap();
        assert_eq!(matched.name, "hub.example.org");
        assert_eq!(machine.remote_sid.as_deref(), Some("002"));
    }

    #[test]
    fn wrong_password_refused() {
        let mut machine = HandshakeMachine::new();
        feed_valid(&mut machine, "wrong");
        let links = vec![link()];
        assert!(matches!(machine.validate(&links), Err(LinkError::BadPassword(_))));
    }

    #[test]
    fn unknown_server_refused() {
        let mut machine = HandshakeMachine::new();
        machine.step(&"PASS in TS 6 :002".parse().unwrap()).unwrap();
        machine
            .step(&format!("CAPAB :{}", REQUIRED_CAPS.join(" ")).parse().unwrap())
            .unwrap();
        machine
            .step(&"SERVER rogue.example.org 1 :rogue".parse().unwrap())
            .unwrap();
        let links = vec![link()];
        assert!(matches!(machine.validate(&links), Err(LinkError::UnknownServer(_))));
    }

    #[test]
    fn missing_caps_refused() {
        let mut machine = HandshakeMachine::new();
        machine.step(&"PASS in TS 6 :002".parse().unwrap()).unwrap();
        machine.step(&"CAPAB :QS ENCAP".parse().unwrap()).unwrap();
        machine
            .step(&"SERVER hub.example.org 1 :A hub".parse().unwrap())
            .unwrap();
        let links = vec![link()];
        match machine.validate(&links) {
            Err(LinkError::MissingCaps(missing)) => {
                assert!(missing.contains("EUID"));
                assert!(missing.contains("TB"));
            }
            other => panic!("expected MissingCaps, got {other:?}"),
        }
    }

    #[test]
    fn sid_pin_enforced() {
        let mut machine = HandshakeMachine::new();
        feed_valid(&mut machine, "in");
        let mut pinned = link();
        pinned.sid = Some("0ZZ".to_string());
        let links = vec![pinned];
        assert!(machine.validate(&links).is_err());
    }

    #[test]
    fn non_ts6_pass_rejected() {
        let mut machine = HandshakeMachine::new();
        assert!(machine.step(&"PASS pw TS 5 :002".parse().unwrap()).is_err());
        assert!(machine.step(&"PASS pw".parse().unwrap()).is_err());
    }

    #[test]
    fn stray_command_rejected() {
        let mut machine = HandshakeMachine::new();
        assert!(machine.step(&"PRIVMSG #c :hi".parse().unwrap()).is_err());
    }
}
