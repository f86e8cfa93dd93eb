use std::sync::atomic::{AtomicU64, Ordering};

use super::types::request::{ClientMessage, Params};

/// Client-chosen request identifier: a decimal counter rendered as a string.
pub type RequestId = String;

/// Allocates request ids and builds request frames.
///
/// Methods and subs draw from the same counter, so ids are unique across both
/// kinds and never reused.
#[derive(Debug, Default)]
pub struct RequestIssuer {
    last: AtomicU64,
}

impl RequestIssuer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `"1"` on the first call, then `"2"`, `"3"`, …
    #[must_use]
    pub fn next_id(&self) -> RequestId {
        let previous = self.last.fetch_add(1, Ordering::Relaxed);
        previous.saturating_add(1).to_string()
    }

    #[must_use]
    pub fn build_method(name: &str, params: Params, id: &str) -> ClientMessage {
        ClientMessage::Method {
            method: name.to_owned(),
            params,
            id: id.to_owned(),
        }
    }

    #[must_use]
    pub fn build_sub(name: &str, params: Params, id: &str) -> ClientMessage {
        ClientMessage::Sub {
            name: name.to_owned(),
            params,
            id: id.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn ids_start_at_one_and_are_shared_across_kinds() {
        let issuer = RequestIssuer::new();

        let method_id = issuer.next_id();
        let sub_id = issuer.next_id();
        let method = RequestIssuer::build_method("createUser", Params::default(), &method_id);
        let sub = RequestIssuer::build_sub("userList", Params::default(), &sub_id);

        assert_eq!(method_id, "1");
        assert_eq!(sub_id, "2");
        assert!(matches!(method, ClientMessage::Method { id, .. } if id == "1"));
        assert!(matches!(sub, ClientMessage::Sub { id, .. } if id == "2"));
    }

    #[test]
    fn build_method_carries_name_and_params() {
        let params = Params::new(vec![json!("Alice")]);
        let frame = RequestIssuer::build_method("createUser", params.clone(), "7");

        assert_eq!(
            frame,
            ClientMessage::Method {
                method: "createUser".to_owned(),
                params,
                id: "7".to_owned(),
            }
        );
    }

    #[test]
    fn ids_stay_unique_under_concurrency() {
        let issuer = Arc::new(RequestIssuer::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let issuer = Arc::clone(&issuer);
                std::thread::spawn(move || (0..250).map(|_| issuer.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let ids: HashSet<RequestId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(ids.len(), 1000);
        assert!(ids.contains("1000"));
    }
}
